//! Isolated execution backend.
//!
//! The fetcher only needs five things from a backend: write and remove the
//! session configuration, begin and end a session, and run a command inside a
//! running session. [`Schroot`] is the real implementation.

mod conf;
mod schroot;

#[cfg(test)]
pub(crate) mod recording;

pub use schroot::Schroot;

use serde::Serialize;
use std::path::PathBuf;

use crate::command::SessionCommand;
use crate::config::{FetchConfig, Proxies};
use crate::error::Result;

/// Mount point of `DL_DIR` inside the session.
pub const SESSION_DOWNLOADS: &str = "/downloads";

/// Mount point of `WORKDIR` inside the session.
pub const SESSION_HOME: &str = "/home/builder";

/// What a session is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEnvironment {
    pub chroot: String,
    pub rootfs: PathBuf,
    pub conf_dir: PathBuf,
    pub user: String,
    /// Host directory mounted at [`SESSION_DOWNLOADS`].
    pub downloads: PathBuf,
    /// Host directory mounted at [`SESSION_HOME`].
    pub workdir: PathBuf,
    pub proxies: Proxies,
}

impl SessionEnvironment {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            chroot: config.sbuild_chroot.clone(),
            rootfs: config.schroot_dir.clone(),
            conf_dir: config.schroot_conf.clone(),
            user: config.schroot_user.clone(),
            downloads: config.dl_dir.clone(),
            workdir: config.workdir.clone(),
            proxies: config.proxies.clone(),
        }
    }
}

/// A running session as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub environment: SessionEnvironment,
}

pub trait SessionBackend {
    /// Write configuration the backend needs before [`Self::begin`].
    fn create_config(&self, env: &SessionEnvironment) -> Result<()>;

    fn delete_config(&self, env: &SessionEnvironment) -> Result<()>;

    /// Start a session and return the backend's raw startup output.
    fn begin(&self, env: &SessionEnvironment) -> Result<String>;

    fn end(&self, session: &Session) -> Result<()>;

    /// Run a command, failing on non-zero exit. Returns stdout.
    fn run_in(&self, session: &Session, command: &SessionCommand) -> Result<String>;

    /// Run a command whose exit status is the answer.
    fn probe_in(&self, session: &Session, command: &SessionCommand) -> Result<bool>;
}
