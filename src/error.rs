//! Error types for the apt source fetcher.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The isolated backend could not prepare or start a session.
    #[error("failed to create build environment '{chroot}': {message}")]
    EnvironmentCreation { chroot: String, message: String },

    /// A command inside the session (or on the host on its behalf) exited non-zero.
    #[error("{step} failed: `{command}` exited with {status}{}", stderr_suffix(.stderr))]
    CommandExecution {
        step: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to lock '{}': {message}", .path.display())]
    LockAcquisition { path: PathBuf, message: String },

    /// Teardown failed and there was no earlier error to report instead.
    #[error("cleanup of session '{session}' failed: {message}")]
    Cleanup { session: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported fetch url '{url}': scheme '{scheme}' is not handled")]
    UnsupportedUrl { url: String, scheme: String },

    #[error("invalid fetch url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

impl FetchError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::CommandExecution { .. })
    }
}
