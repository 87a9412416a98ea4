//! Typed commands executed inside a chroot session.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Which user a session command runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAs {
    Root,
    /// The session's default (unprivileged) user.
    Builder,
}

/// One program invocation inside the session.
///
/// `program` and `args` are handed to the backend as separate tokens and never
/// re-parsed by a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCommand {
    /// Short name of the step this command belongs to, used in errors.
    pub step: &'static str,
    pub user: RunAs,
    pub workdir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
}

impl SessionCommand {
    pub fn root(step: &'static str, program: &str) -> Self {
        Self::new(step, RunAs::Root, program)
    }

    pub fn builder(step: &'static str, program: &str) -> Self {
        Self::new(step, RunAs::Builder, program)
    }

    fn new(step: &'static str, user: RunAs, program: &str) -> Self {
        Self {
            step,
            user,
            workdir: PathBuf::from("/"),
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.workdir = dir.to_path_buf();
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}
