//! Subprocess execution for engine lifecycle commands
//!
//! A thin, stateless runner: spawn, capture output, report exit status.
//! Retries and interpretation are the caller's concern.

use crate::error::{ControlError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default timeout for lightweight health-check commands
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code, if the process exited normally
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Seam for executing external lifecycle commands
///
/// The monitor and orchestrator go through this trait so tests can script
/// outcomes and assert on issued commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, blocking the calling task until it
    /// exits or `timeout` elapses
    async fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> Result<RunOutput>;
}

/// Real runner backed by tokio's process support
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> Result<RunOutput> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControlError::Launch {
                program: program.display().to_string(),
                reason: e.to_string(),
            })?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ControlError::CommandTimeout {
                program: program.display().to_string(),
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| ControlError::Launch {
                program: program.display().to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            program = %program.display(),
            code = ?output.status.code(),
            "Command finished"
        );

        Ok(RunOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Scripted runner for tests and offline use
///
/// The process-level analogue of the memory transport: outcomes are
/// scripted per command pattern, and every issued command is recorded
/// for call-count assertions. Unmatched commands succeed with empty
/// output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: std::sync::Mutex<Vec<Rule>>,
    calls: std::sync::Mutex<Vec<String>>,
}

struct Rule {
    pattern: String,
    outcomes: std::collections::VecDeque<ScriptedOutcome>,
}

/// One scripted command result
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Process ran and exited with `code`
    Exit { code: i32, stdout: String },
    /// Process could not be spawned
    LaunchFailure(String),
    /// Process exceeded the caller's timeout
    Timeout,
}

impl ScriptedOutcome {
    pub fn ok(stdout: impl Into<String>) -> Self {
        ScriptedOutcome::Exit {
            code: 0,
            stdout: stdout.into(),
        }
    }

    pub fn fail(code: i32) -> Self {
        ScriptedOutcome::Exit {
            code,
            stdout: String::new(),
        }
    }
}

impl ScriptedRunner {
    /// Script a repeating outcome for commands containing `pattern`
    pub fn on(&self, pattern: impl Into<String>, outcome: ScriptedOutcome) {
        self.on_sequence(pattern, vec![outcome]);
    }

    /// Script a sequence of outcomes; the last one repeats once drained
    pub fn on_sequence(&self, pattern: impl Into<String>, outcomes: Vec<ScriptedOutcome>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.into(),
            outcomes: outcomes.into(),
        });
    }

    /// Every command issued so far, program and args joined by spaces
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of issued commands containing `pattern`
    pub fn call_count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn next_outcome(&self, command: &str) -> Option<ScriptedOutcome> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| command.contains(&r.pattern))?;
        if rule.outcomes.len() > 1 {
            rule.outcomes.pop_front()
        } else {
            rule.outcomes.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> Result<RunOutput> {
        let command = std::iter::once(program.display().to_string())
            .chain(args.iter().map(|a| a.to_string()))
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(command.clone());

        match self.next_outcome(&command) {
            Some(ScriptedOutcome::Exit { code, stdout }) => Ok(RunOutput {
                status_code: Some(code),
                stdout,
                stderr: if code == 0 {
                    String::new()
                } else {
                    format!("command failed with code {code}")
                },
            }),
            Some(ScriptedOutcome::LaunchFailure(reason)) => Err(ControlError::Launch {
                program: program.display().to_string(),
                reason,
            }),
            Some(ScriptedOutcome::Timeout) => Err(ControlError::CommandTimeout {
                program: program.display().to_string(),
                timeout_secs: timeout.as_secs(),
            }),
            None => Ok(RunOutput {
                status_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}
