//! Thin builder over `std::process::Command` for host-side tool invocations.
//!
//! Arguments are always passed as discrete tokens; nothing here goes through a
//! shell.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn status_string(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit status: {code}"),
            None => "termination by signal".to_string(),
        }
    }
}

/// Host command builder.
///
/// By default a non-zero exit is turned into an error carrying stderr. Use
/// [`Cmd::allow_fail`] to inspect the result yourself.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: BTreeMap<String, String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: BTreeMap::new(),
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_owned());
        self
    }

    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (k, v) in vars {
            self.envs.insert(k.clone(), v.clone());
        }
        self
    }

    /// Do not fail on non-zero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Human-readable rendering, for logs and error messages only.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }

    pub fn run(&self) -> Result<CommandResult> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.envs);

        let output = command
            .output()
            .with_context(|| format!("running '{}'", self.display()))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.allow_fail {
            bail!(
                "'{}' failed ({}): {}",
                self.display(),
                result.status_string(),
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let result = Cmd::new("echo").args(["hello", "world"]).run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello world");
    }

    #[test]
    fn test_nonzero_exit_is_error_unless_allowed() {
        let err = Cmd::new("false").run().unwrap_err();
        assert!(err.to_string().contains("'false' failed (exit status: 1)"));

        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.status_string(), "exit status: 1");
    }

    #[test]
    fn test_envs_are_exported() {
        let mut vars = BTreeMap::new();
        vars.insert("http_proxy".to_string(), "http://proxy:3128".to_string());
        let result = Cmd::new("sh")
            .args(["-c", "printf '%s' \"$http_proxy\""])
            .envs(vars.iter())
            .run()
            .unwrap();
        assert_eq!(result.stdout, "http://proxy:3128");
    }

    #[test]
    fn test_display_joins_tokens() {
        let cmd = Cmd::new("schroot").args(["-q", "-b", "-c", "sbuild"]);
        assert_eq!(cmd.display(), "schroot -q -b -c sbuild");
        assert_eq!(cmd.program(), "schroot");
        assert_eq!(cmd.arg_list().len(), 4);
    }
}
