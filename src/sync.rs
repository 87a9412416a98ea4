//! Package index refresh under the shared repository lock.

use std::path::Path;
use tracing::info;

use crate::backend::{Session, SessionBackend};
use crate::command::SessionCommand;
use crate::error::Result;
use crate::lock::RepoLock;

/// Sources list, relative to `/etc/apt`, that the refresh is restricted to.
pub const BASE_APT_SOURCE_LIST: &str = "sources.list.d/base-apt.list";

/// `apt-get update` limited to the base-apt source, with `sources.list.d`
/// parsing disabled so unrelated repositories are not pulled in.
pub fn refresh_command() -> SessionCommand {
    SessionCommand::root("refresh package index", "apt-get").args([
        "-y".to_string(),
        "update".to_string(),
        "-o".to_string(),
        format!("Dir::Etc::SourceList={BASE_APT_SOURCE_LIST}"),
        "-o".to_string(),
        "Dir::Etc::SourceParts=-".to_string(),
    ])
}

/// Refresh the package index if `enabled`, holding `lock_path` for the
/// duration of the refresh only.
///
/// Returns whether a refresh ran.
pub fn sync_if_enabled<B: SessionBackend + ?Sized>(
    enabled: bool,
    lock_path: &Path,
    backend: &B,
    session: &Session,
) -> Result<bool> {
    if !enabled {
        return Ok(false);
    }

    let mut lock = RepoLock::acquire(lock_path)?;
    info!(session = %session.id, lock = %lock_path.display(), "refreshing base-apt package index");
    let refreshed = backend.run_in(session, &refresh_command());
    lock.release();
    refreshed.map(|_| true)
}
