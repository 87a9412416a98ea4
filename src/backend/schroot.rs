use tracing::debug;

use super::{Session, SessionBackend, SessionEnvironment};
use crate::command::{RunAs, SessionCommand};
use crate::error::{FetchError, Result};
use crate::process::{Cmd, CommandResult};

/// schroot-backed sessions.
#[derive(Debug, Clone)]
pub struct Schroot {
    program: String,
}

impl Default for Schroot {
    fn default() -> Self {
        Self {
            program: "schroot".to_string(),
        }
    }
}

impl Schroot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different schroot executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base(&self, env: &SessionEnvironment) -> Cmd {
        Cmd::new(&self.program).envs(env.proxies.iter()).allow_fail()
    }

    /// `schroot -r -c <id> -d <dir> [-u root] -- <argv>`
    pub fn session_cmd(&self, session: &Session, command: &SessionCommand) -> Cmd {
        let mut cmd = self
            .base(&session.environment)
            .args(["-r", "-c", session.id.as_str(), "-d"])
            .arg_path(&command.workdir);
        if command.user == RunAs::Root {
            cmd = cmd.args(["-u", "root"]);
        }
        cmd.arg("--").args(command.argv())
    }

    fn run_session_cmd(&self, session: &Session, command: &SessionCommand) -> Result<CommandResult> {
        let cmd = self.session_cmd(session, command);
        debug!(session = %session.id, command = %command, "running in session");
        cmd.run().map_err(|e| FetchError::CommandExecution {
            step: command.step.to_string(),
            command: command.to_string(),
            status: "not started".to_string(),
            stderr: format!("{e:#}"),
        })
    }
}

impl SessionBackend for Schroot {
    fn create_config(&self, env: &SessionEnvironment) -> Result<()> {
        env.write_files()
            .map_err(|e| FetchError::EnvironmentCreation {
                chroot: env.chroot.clone(),
                message: format!("{e:#}"),
            })
    }

    fn delete_config(&self, env: &SessionEnvironment) -> Result<()> {
        env.remove_files().map_err(|e| FetchError::Cleanup {
            session: env.chroot.clone(),
            message: format!("{e:#}"),
        })
    }

    fn begin(&self, env: &SessionEnvironment) -> Result<String> {
        let creation_error = |message: String| FetchError::EnvironmentCreation {
            chroot: env.chroot.clone(),
            message,
        };

        let result = self
            .base(env)
            .args(["-q", "-b", "-c", env.chroot.as_str()])
            .run()
            .map_err(|e| creation_error(format!("{e:#}")))?;
        if !result.success() {
            return Err(creation_error(format!(
                "{}: {}",
                result.status_string(),
                result.stderr.trim()
            )));
        }
        Ok(result.stdout)
    }

    fn end(&self, session: &Session) -> Result<()> {
        let result = self
            .base(&session.environment)
            .args(["-q", "-f", "-e", "-c", session.id.as_str()])
            .run()
            .map_err(|e| FetchError::Cleanup {
                session: session.id.clone(),
                message: format!("{e:#}"),
            })?;
        if !result.success() {
            return Err(FetchError::Cleanup {
                session: session.id.clone(),
                message: format!("{}: {}", result.status_string(), result.stderr.trim()),
            });
        }
        Ok(())
    }

    fn run_in(&self, session: &Session, command: &SessionCommand) -> Result<String> {
        let result = self.run_session_cmd(session, command)?;
        if !result.success() {
            return Err(FetchError::CommandExecution {
                step: command.step.to_string(),
                command: command.to_string(),
                status: result.status_string(),
                stderr: result.stderr,
            });
        }
        Ok(result.stdout)
    }

    fn probe_in(&self, session: &Session, command: &SessionCommand) -> Result<bool> {
        Ok(self.run_session_cmd(session, command)?.success())
    }
}
