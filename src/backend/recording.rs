//! In-memory backend for tests: records every call and fails on request.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::{Session, SessionBackend, SessionEnvironment};
use crate::command::SessionCommand;
use crate::error::{FetchError, Result};
use crate::lock::is_locked;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    CreateConfig,
    Begin,
    Run {
        command: SessionCommand,
        /// Lock state of each watched path when the command ran.
        locks: Vec<bool>,
    },
    Probe(SessionCommand),
    End {
        id: String,
        locks: Vec<bool>,
    },
    DeleteConfig,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    pub events: RefCell<Vec<Event>>,
    pub begin_output: String,
    pub fail_create_config: bool,
    pub fail_begin: bool,
    pub fail_end: bool,
    /// Steps whose commands exit non-zero.
    pub failing_steps: BTreeSet<&'static str>,
    /// Stdout returned for commands of a step.
    pub outputs: BTreeMap<&'static str, String>,
    /// Paths `test -e` reports as existing.
    pub existing: BTreeSet<String>,
    /// Lock files whose state is sampled on every run and at session end.
    pub watched_locks: Vec<PathBuf>,
}

impl RecordingBackend {
    pub fn new(session_id: &str) -> Self {
        Self {
            begin_output: format!("  {session_id}\n"),
            ..Self::default()
        }
    }

    pub fn fail_step(mut self, step: &'static str) -> Self {
        self.failing_steps.insert(step);
        self
    }

    pub fn with_output(mut self, step: &'static str, stdout: &str) -> Self {
        self.outputs.insert(step, stdout.to_string());
        self
    }

    pub fn with_existing(mut self, path: &str) -> Self {
        self.existing.insert(path.to_string());
        self
    }

    pub fn watch_lock(mut self, path: PathBuf) -> Self {
        self.watched_locks.push(path);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Commands that ran to completion or failed, in order.
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Run { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.commands().iter().map(|c| c.step).collect()
    }

    pub fn count(&self, wanted: fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| wanted(e)).count()
    }

    fn lock_states(&self) -> Vec<bool> {
        self.watched_locks.iter().map(|p| is_locked(p)).collect()
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl SessionBackend for RecordingBackend {
    fn create_config(&self, env: &SessionEnvironment) -> Result<()> {
        self.push(Event::CreateConfig);
        if self.fail_create_config {
            return Err(FetchError::EnvironmentCreation {
                chroot: env.chroot.clone(),
                message: "No space left on device".into(),
            });
        }
        Ok(())
    }

    fn delete_config(&self, _env: &SessionEnvironment) -> Result<()> {
        self.push(Event::DeleteConfig);
        Ok(())
    }

    fn begin(&self, env: &SessionEnvironment) -> Result<String> {
        self.push(Event::Begin);
        if self.fail_begin {
            return Err(FetchError::EnvironmentCreation {
                chroot: env.chroot.clone(),
                message: "E: no free session slots".into(),
            });
        }
        Ok(self.begin_output.clone())
    }

    fn end(&self, session: &Session) -> Result<()> {
        self.push(Event::End {
            id: session.id.clone(),
            locks: self.lock_states(),
        });
        if self.fail_end {
            return Err(FetchError::Cleanup {
                session: session.id.clone(),
                message: "E: session already ended".into(),
            });
        }
        Ok(())
    }

    fn run_in(&self, _session: &Session, command: &SessionCommand) -> Result<String> {
        self.push(Event::Run {
            command: command.clone(),
            locks: self.lock_states(),
        });
        if self.failing_steps.contains(command.step) {
            return Err(FetchError::CommandExecution {
                step: command.step.to_string(),
                command: command.to_string(),
                status: "exit status: 100".into(),
                stderr: "E: simulated failure".into(),
            });
        }
        Ok(self.outputs.get(command.step).cloned().unwrap_or_default())
    }

    fn probe_in(&self, _session: &Session, command: &SessionCommand) -> Result<bool> {
        self.push(Event::Probe(command.clone()));
        Ok(command
            .args
            .last()
            .is_some_and(|path| self.existing.contains(path)))
    }
}
