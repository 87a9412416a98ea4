//! Session lifecycle and guaranteed cleanup.
//!
//! A [`SessionGuard`] owns one running session plus any locks taken while it
//! runs. Cleanup happens exactly once, either through [`SessionGuard::finish`]
//! or, on early return or panic, through `Drop`, and always in this order:
//!
//! 1. release held locks (they protect state shared across sessions)
//! 2. end the session (best-effort, failure only logged here)
//! 3. delete the session configuration

use tracing::{debug, info, warn};

use crate::backend::{Session, SessionBackend, SessionEnvironment};
use crate::error::{FetchError, Result};
use crate::lock::RepoLock;

pub struct SessionGuard<'b, B: SessionBackend + ?Sized> {
    backend: &'b B,
    session: Session,
    locks: Vec<RepoLock>,
    finished: bool,
}

impl<'b, B: SessionBackend + ?Sized> SessionGuard<'b, B> {
    /// Write the backend config and start a session.
    ///
    /// If the config cannot be written completely or the session cannot be
    /// started, whatever config exists is removed again before the error is
    /// returned.
    pub fn begin(backend: &'b B, environment: SessionEnvironment) -> Result<Self> {
        let started = backend
            .create_config(&environment)
            .and_then(|()| backend.begin(&environment))
            .and_then(|raw| {
                let id = raw.trim();
                if id.is_empty() {
                    return Err(FetchError::EnvironmentCreation {
                        chroot: environment.chroot.clone(),
                        message: "backend returned an empty session id".into(),
                    });
                }
                Ok(id.to_string())
            });

        let id = match started {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = backend.delete_config(&environment) {
                    warn!(chroot = %environment.chroot, error = %cleanup, "failed to delete session config");
                }
                return Err(e);
            }
        };

        info!(session = %id, "Started session");
        Ok(Self {
            backend,
            session: Session { id, environment },
            locks: Vec::new(),
            finished: false,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    /// Keep `lock` until cleanup, where it is released before the session ends.
    pub fn hold(&mut self, lock: RepoLock) {
        debug!(session = %self.session.id, lock = %lock.path().display(), "holding lock for session");
        self.locks.push(lock);
    }

    /// Run cleanup now and report its first failure.
    pub fn finish(mut self) -> Result<()> {
        self.cleanup()
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        while let Some(mut lock) = self.locks.pop() {
            lock.release();
        }

        let ended = self.backend.end(&self.session);
        if let Err(e) = &ended {
            warn!(session = %self.session.id, error = %e, "failed to end session");
        }

        let deleted = self.backend.delete_config(&self.session.environment);
        if let Err(e) = &deleted {
            warn!(session = %self.session.id, error = %e, "failed to delete session config");
        }

        debug!(session = %self.session.id, "session cleaned up");
        ended.and(deleted)
    }
}

impl<B: SessionBackend + ?Sized> Drop for SessionGuard<'_, B> {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Run `body` inside a fresh session and always clean up afterwards.
///
/// An error from `body` wins over any cleanup error. A cleanup error is only
/// returned when `body` succeeded.
pub fn with_session<B, T, F>(backend: &B, environment: SessionEnvironment, body: F) -> Result<T>
where
    B: SessionBackend + ?Sized,
    F: FnOnce(&mut SessionGuard<'_, B>) -> Result<T>,
{
    let mut guard = SessionGuard::begin(backend, environment)?;
    let outcome = body(&mut guard);
    let cleanup = guard.finish();
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), _) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Event, RecordingBackend};
    use crate::backend::Schroot;
    use crate::command::SessionCommand;
    use crate::config::Proxies;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn environment() -> SessionEnvironment {
        SessionEnvironment {
            chroot: "isar-debian-bookworm-amd64".into(),
            rootfs: PathBuf::from("/rootfs"),
            conf_dir: PathBuf::from("/etc/schroot"),
            user: "builder".into(),
            downloads: PathBuf::from("/dl"),
            workdir: PathBuf::from("/work"),
            proxies: Proxies::default(),
        }
    }

    fn is_end(e: &Event) -> bool {
        matches!(e, Event::End { .. })
    }

    fn is_delete(e: &Event) -> bool {
        matches!(e, Event::DeleteConfig)
    }

    #[test]
    fn test_session_id_is_trimmed() {
        let backend = RecordingBackend::new("session-42");
        let id = with_session(&backend, environment(), |guard| Ok(guard.id().to_string())).unwrap();
        assert_eq!(id, "session-42");

        let events = backend.events();
        assert_eq!(events[0], Event::CreateConfig);
        assert_eq!(events[1], Event::Begin);
        assert!(matches!(&events[2], Event::End { id, .. } if id == "session-42"));
        assert_eq!(events[3], Event::DeleteConfig);
    }

    #[test]
    fn test_begin_failure_deletes_config_without_ending() {
        let mut backend = RecordingBackend::new("unused");
        backend.fail_begin = true;

        let err = with_session(&backend, environment(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, FetchError::EnvironmentCreation { .. }));
        assert_eq!(backend.count(is_end), 0);
        assert_eq!(backend.count(is_delete), 1);
    }

    #[test]
    fn test_partial_config_is_removed_when_writing_fails() {
        let mut backend = RecordingBackend::new("unused");
        backend.fail_create_config = true;

        let err = with_session(&backend, environment(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, FetchError::EnvironmentCreation { .. }));
        assert_eq!(
            backend.events(),
            vec![Event::CreateConfig, Event::DeleteConfig]
        );
    }

    #[test]
    fn test_schroot_config_written_before_failure_is_removed() {
        let temp = TempDir::new().unwrap();
        let mut env = environment();
        env.conf_dir = temp.path().join("schroot");
        // A file where the profile directory belongs stops write_files after
        // the chroot definition is in place.
        std::fs::create_dir_all(&env.conf_dir).unwrap();
        std::fs::write(env.profile_dir(), b"").unwrap();

        let schroot = Schroot::with_program("definitely-not-schroot-12345");
        let err = SessionGuard::begin(&schroot, env.clone()).err().unwrap();
        assert!(matches!(err, FetchError::EnvironmentCreation { .. }));
        assert!(!env.chroot_file().exists());
    }

    #[test]
    fn test_empty_session_id_is_environment_error() {
        let backend = RecordingBackend::new("   ");
        let err = SessionGuard::begin(&backend, environment()).err().unwrap();
        assert!(matches!(err, FetchError::EnvironmentCreation { .. }));
        assert_eq!(backend.count(is_delete), 1);
    }

    #[test]
    fn test_body_error_survives_cleanup_failure() {
        let mut backend = RecordingBackend::new("s1").fail_step("download");
        backend.fail_end = true;

        let err = with_session(&backend, environment(), |guard| {
            let cmd = SessionCommand::builder("download", "apt-get");
            guard.backend().run_in(guard.session(), &cmd)
        })
        .unwrap_err();

        assert!(err.is_command_failure());
        assert_eq!(backend.count(is_end), 1);
        assert_eq!(backend.count(is_delete), 1);
    }

    #[test]
    fn test_cleanup_failure_reported_when_body_succeeds() {
        let mut backend = RecordingBackend::new("s1");
        backend.fail_end = true;

        let err = with_session(&backend, environment(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, FetchError::Cleanup { .. }));
        assert_eq!(backend.count(is_delete), 1, "config deleted even if end fails");
    }

    #[test]
    fn test_held_lock_released_before_session_end() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("isar.lock");
        let backend = RecordingBackend::new("s1").watch_lock(lock_path.clone());

        with_session(&backend, environment(), |guard| {
            guard.hold(RepoLock::acquire(&lock_path)?);
            guard
                .backend()
                .run_in(guard.session(), &SessionCommand::builder("work", "true"))
        })
        .unwrap();

        let events = backend.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Run { locks, .. } if locks == &vec![true])));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::End { locks, .. } if locks == &vec![false])));
    }

    #[test]
    fn test_drop_cleans_up_on_panic() {
        let backend = RecordingBackend::new("s1");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SessionGuard::begin(&backend, environment()).unwrap();
            panic!("interrupted");
        }));
        assert!(result.is_err());
        assert_eq!(backend.count(is_end), 1);
        assert_eq!(backend.count(is_delete), 1);
    }

    #[test]
    fn test_finish_then_drop_cleans_up_once() {
        let backend = RecordingBackend::new("s1");
        let guard = SessionGuard::begin(&backend, environment()).unwrap();
        guard.finish().unwrap();
        assert_eq!(backend.count(is_end), 1);
        assert_eq!(backend.count(is_delete), 1);
    }
}
