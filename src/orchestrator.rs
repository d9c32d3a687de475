//! Container lifecycle orchestration
//!
//! Drives first-run setup and steady-state start/stop/restart of the
//! backend containers. All lifecycle operations are serialized behind one
//! internal guard; polling loops are owned, cancellable tasks joined on
//! shutdown.

use crate::config::ContainerConfig;
use crate::error::{ControlError, Result};
use crate::monitor::HealthMonitor;
use crate::process::CommandRunner;
use crate::types::{ConnectionState, ContainerHealth, SetupFailure, SetupProgress, SetupStage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the health broadcast channel
const HEALTH_CAPACITY: usize = 32;

/// Cap on the doubling delay between start-command retries
const START_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// How long the channel's own reconnect gets before recovery steps in
const RECOVERY_GRACE: Duration = Duration::from_secs(5);

/// Orchestrator for the backend engine and containers
pub struct Orchestrator {
    config: ContainerConfig,
    runner: Arc<dyn CommandRunner>,
    monitor: HealthMonitor,
    /// Serializes lifecycle operations; `try_lock` miss means one is in flight
    ops: Mutex<()>,
    progress_tx: watch::Sender<SetupProgress>,
    health_tx: broadcast::Sender<ContainerHealth>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: ContainerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let monitor = HealthMonitor::new(config.clone(), runner.clone());
        let (progress_tx, _) = watch::channel(SetupProgress::default());
        let (health_tx, _) = broadcast::channel(HEALTH_CAPACITY);
        Self {
            config,
            runner,
            monitor,
            ops: Mutex::new(()),
            progress_tx,
            health_tx,
            tasks: std::sync::Mutex::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Watch setup progress (single writer, any number of readers)
    pub fn setup_progress(&self) -> watch::Receiver<SetupProgress> {
        self.progress_tx.subscribe()
    }

    /// Receive container-health changes from the polling task
    pub fn subscribe_health(&self) -> broadcast::Receiver<ContainerHealth> {
        self.health_tx.subscribe()
    }

    /// On-demand health check, delegated to the monitor
    pub async fn current_health(&self) -> ContainerHealth {
        self.monitor.check_engine_health().await
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Run the first-run setup state machine
    ///
    /// A failed step is terminal for the run: the stage and error are
    /// recorded in the progress state and returned; nothing is retried
    /// beyond the per-step budgets. Cancellation stops promptly and
    /// leaves the last observed state without marking a failure.
    pub async fn run_setup(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self
            .ops
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress)?;

        self.progress_tx.send_replace(SetupProgress::default());
        ensure_live(cancel)?;

        self.set_progress(SetupStage::CheckingPrerequisites, 5);
        let health = self.monitor.check_engine_health().await;
        ensure_live(cancel)?;

        self.set_progress(SetupStage::InstallingEngine, 20);
        match health {
            ContainerHealth::NotInstalled => {
                return Err(self.fail_stage(
                    SetupStage::InstallingEngine,
                    "engine binary not found; install the container engine and retry",
                ));
            }
            ContainerHealth::Unknown { detail } => {
                return Err(self.fail_stage(
                    SetupStage::InstallingEngine,
                    format!("engine probe failed: {detail}"),
                ));
            }
            ContainerHealth::Installed { running: false } => {
                self.stage_result(SetupStage::InstallingEngine, self.start_engine(cancel).await)?;
            }
            ContainerHealth::Installed { running: true } => {}
        }

        ensure_live(cancel)?;
        self.set_progress(SetupStage::InstallingBroker, 45);
        self.stage_result(SetupStage::InstallingBroker, self.ensure_broker(cancel).await)?;

        ensure_live(cancel)?;
        self.set_progress(SetupStage::StartingContainer, 70);
        self.stage_result(
            SetupStage::StartingContainer,
            self.start_container_inner(cancel).await,
        )?;

        ensure_live(cancel)?;
        self.set_progress(SetupStage::Verifying, 90);
        self.stage_result(SetupStage::Verifying, self.verify_running(cancel).await)?;

        self.set_progress(SetupStage::Complete, 100);
        tracing::info!("Setup complete");
        Ok(())
    }

    /// Start the backend container
    ///
    /// No-op success if it is already running (no start command issued).
    pub async fn start_container(&self) -> Result<()> {
        self.start_container_cancellable(&CancellationToken::new())
            .await
    }

    /// `start_container` with caller-initiated cancellation
    pub async fn start_container_cancellable(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self
            .ops
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress)?;
        self.start_container_inner(cancel).await
    }

    /// Stop the backend container; idempotent when already stopped
    pub async fn stop_container(&self) -> Result<()> {
        let _guard = self
            .ops
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress)?;
        self.stop_container_inner().await
    }

    /// Stop followed by start; the first sub-step failure surfaces
    pub async fn restart(&self) -> Result<()> {
        let _guard = self
            .ops
            .try_lock()
            .map_err(|_| ControlError::OperationInProgress)?;
        self.stop_container_inner().await?;
        self.start_container_inner(&CancellationToken::new()).await
    }

    /// Spawn the owned health-polling task
    ///
    /// Emits a `ContainerHealth` on every change. Stopped and joined by
    /// `shutdown`.
    pub fn spawn_health_poll(self: &Arc<Self>, interval: Duration) {
        let orch = self.clone();
        let cancel = self.shutdown_token.child_token();
        let handle = tokio::spawn(async move {
            let mut last: Option<ContainerHealth> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let health = orch.monitor.check_engine_health().await;
                if last.as_ref() != Some(&health) {
                    tracing::debug!(health = ?health, "Container health changed");
                    let _ = orch.health_tx.send(health.clone());
                    last = Some(health);
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Spawn the owned recovery task
    ///
    /// Watches the channel's connection state; a drop that outlasts the
    /// channel's own reconnect grace triggers a health check and, if the
    /// backend is down, a container start.
    pub fn spawn_recovery(self: &Arc<Self>, mut states: broadcast::Receiver<ConnectionState>) {
        let orch = self.clone();
        let cancel = self.shutdown_token.child_token();
        let handle = tokio::spawn(async move {
            loop {
                let state = tokio::select! {
                    _ = cancel.cancelled() => break,
                    state = states.recv() => match state {
                        Ok(state) => state,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if state != ConnectionState::Disconnected {
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECOVERY_GRACE) => {}
                }

                if orch.monitor.is_target_container_running().await {
                    continue;
                }
                tracing::info!("Channel down and backend container not running; recovering");
                match orch.start_container().await {
                    Ok(()) => {}
                    Err(ControlError::OperationInProgress) => {
                        tracing::debug!("Lifecycle operation already in flight; skipping recovery");
                    }
                    Err(e) => tracing::warn!(error = %e, "Recovery attempt failed"),
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Stop and join every owned background task
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    // ── Setup steps ───────────────────────────────────────────────────────

    /// Bring the engine daemon up via the configured start command
    async fn start_engine(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(command) = &self.config.engine_start_command else {
            return Err(ControlError::Orchestration {
                op: "engine start".into(),
                attempts: 0,
                reason: "engine daemon is not running and no start command is configured".into(),
            });
        };
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ControlError::Config("engine start command is empty".into()))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        tracing::info!(command = ?command, "Starting engine daemon");
        let out = self
            .runner
            .run(Path::new(program), &args, self.config.install_timeout())
            .await?;
        if !out.success() {
            return Err(ControlError::Orchestration {
                op: "engine start".into(),
                attempts: 1,
                reason: failure_reason(&out.stderr, out.status_code),
            });
        }

        for attempt in 1..=self.config.engine_wait_attempts {
            cancellable_sleep(cancel, self.config.verify_interval()).await?;
            if self.monitor.check_engine_health().await.is_operational() {
                return Ok(());
            }
            tracing::debug!(attempt, "Engine daemon not up yet");
        }
        Err(ControlError::Orchestration {
            op: "engine start".into(),
            attempts: self.config.engine_wait_attempts,
            reason: "daemon did not come up".into(),
        })
    }

    /// Make sure the broker container is running
    ///
    /// Tries a plain start of the existing container first; falls back to
    /// bringing the compose stack up on first run.
    async fn ensure_broker(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_live(cancel)?;
        if self
            .monitor
            .is_container_running(&self.config.broker_container)
            .await
        {
            return Ok(());
        }

        if let Err(start_err) = self.start_named(&self.config.broker_container).await {
            tracing::warn!(error = %start_err, "Broker container start failed; trying compose");
            self.compose_up().await?;
        }
        Ok(())
    }

    async fn start_named(&self, name: &str) -> Result<()> {
        let engine = self.engine_path().await?;
        let out = self
            .runner
            .run(&engine, &["start", name], self.config.health_timeout())
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(ControlError::Orchestration {
                op: format!("start '{name}'"),
                attempts: 1,
                reason: failure_reason(&out.stderr, out.status_code),
            })
        }
    }

    async fn compose_up(&self) -> Result<()> {
        let Some(compose_file) = &self.config.compose_file else {
            return Err(ControlError::Config(
                "no compose file configured for first-run container creation".into(),
            ));
        };
        let engine = self.engine_path().await?;
        let compose_file = compose_file.display().to_string();
        let out = self
            .runner
            .run(
                &engine,
                &["compose", "-f", &compose_file, "up", "-d"],
                self.config.install_timeout(),
            )
            .await?;
        if out.success() {
            tracing::info!(compose_file = %compose_file, "Compose stack is up");
            Ok(())
        } else {
            Err(ControlError::Orchestration {
                op: "compose up".into(),
                attempts: 1,
                reason: failure_reason(&out.stderr, out.status_code),
            })
        }
    }

    async fn verify_running(&self, cancel: &CancellationToken) -> Result<()> {
        for _ in 0..self.config.verify_attempts {
            if self.monitor.is_target_container_running().await {
                return Ok(());
            }
            cancellable_sleep(cancel, self.config.verify_interval()).await?;
        }
        Err(ControlError::StartTimeout {
            container: self.config.container_name.clone(),
        })
    }

    // ── Lifecycle internals (guard held by the caller) ────────────────────

    async fn start_container_inner(&self, cancel: &CancellationToken) -> Result<()> {
        if self.monitor.is_target_container_running().await {
            tracing::debug!(container = %self.config.container_name, "Already running");
            return Ok(());
        }

        let engine = self.engine_path().await?;
        let mut backoff = self.config.start_backoff();
        let mut last_reason = String::new();
        let mut started = false;

        for attempt in 1..=self.config.start_attempts {
            ensure_live(cancel)?;
            match self
                .runner
                .run(
                    &engine,
                    &["start", &self.config.container_name],
                    self.config.health_timeout(),
                )
                .await
            {
                Ok(out) if out.success() => {
                    started = true;
                    break;
                }
                Ok(out) => last_reason = failure_reason(&out.stderr, out.status_code),
                Err(e) => last_reason = e.to_string(),
            }
            tracing::debug!(attempt, reason = %last_reason, "Start command failed");
            if attempt < self.config.start_attempts {
                cancellable_sleep(cancel, backoff).await?;
                backoff = (backoff * 2).min(START_BACKOFF_CAP);
            }
        }

        if !started {
            return Err(ControlError::Orchestration {
                op: format!("start '{}'", self.config.container_name),
                attempts: self.config.start_attempts,
                reason: last_reason,
            });
        }

        self.verify_running(cancel).await
    }

    async fn stop_container_inner(&self) -> Result<()> {
        if !self.monitor.is_target_container_running().await {
            return Ok(());
        }

        let engine = self.engine_path().await?;
        let out = self
            .runner
            .run(
                &engine,
                &["stop", &self.config.container_name],
                self.config.install_timeout(),
            )
            .await?;
        if out.success() {
            tracing::info!(container = %self.config.container_name, "Container stopped");
            return Ok(());
        }

        // A failed stop of a container that is gone anyway counts as stopped
        if !self.monitor.is_target_container_running().await {
            return Ok(());
        }
        Err(ControlError::Orchestration {
            op: format!("stop '{}'", self.config.container_name),
            attempts: 1,
            reason: failure_reason(&out.stderr, out.status_code),
        })
    }

    async fn engine_path(&self) -> Result<std::path::PathBuf> {
        self.monitor
            .locate_engine()
            .await
            .ok_or_else(|| ControlError::Launch {
                program: self.config.engine_binary.clone(),
                reason: "engine binary not found".into(),
            })
    }

    fn set_progress(&self, stage: SetupStage, percent: u8) {
        tracing::info!(stage = %stage, percent, "Setup progress");
        self.progress_tx.send_modify(|p| {
            p.stage = stage;
            p.percent_complete = percent;
        });
    }

    /// Record a terminal stage failure and build the error for it
    fn fail_stage(&self, stage: SetupStage, reason: impl Into<String>) -> ControlError {
        let reason = reason.into();
        self.progress_tx.send_modify(|p| {
            p.failure = Some(SetupFailure {
                stage,
                message: reason.clone(),
            });
        });
        tracing::error!(stage = %stage, reason = %reason, "Setup failed");
        ControlError::Setup { stage, reason }
    }

    /// Map a step result: cancellation passes through untouched, any
    /// other failure becomes the stage's terminal failure
    fn stage_result(&self, stage: SetupStage, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(ControlError::Cancelled) => Err(ControlError::Cancelled),
            Err(e) => Err(self.fail_stage(stage, e.to_string())),
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ControlError::Cancelled)
    } else {
        Ok(())
    }
}

async fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ControlError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn failure_reason(stderr: &str, code: Option<i32>) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exited with code {}", code.map_or("?".into(), |c| c.to_string()))
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ScriptedOutcome, ScriptedRunner};
    use std::path::PathBuf;

    fn fast_config() -> ContainerConfig {
        ContainerConfig {
            engine_paths: vec![PathBuf::from("/bin/sh")],
            start_attempts: 2,
            start_backoff_secs: 1,
            verify_attempts: 2,
            verify_interval_secs: 1,
            engine_wait_attempts: 2,
            ..ContainerConfig::default()
        }
    }

    fn orchestrator(config: ContainerConfig, runner: ScriptedRunner) -> (Orchestrator, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (Orchestrator::new(config, runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_start_is_noop_when_already_running() {
        let runner = ScriptedRunner::default();
        runner.on(
            "name=openmoxie-server",
            ScriptedOutcome::ok("openmoxie-server\n"),
        );
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.start_container().await.unwrap();
        assert_eq!(runner.call_count("start openmoxie-server"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_issues_command_and_polls_to_running() {
        let runner = ScriptedRunner::default();
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok(""),
                ScriptedOutcome::ok("openmoxie-server\n"),
            ],
        );
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.start_container().await.unwrap();
        assert_eq!(runner.call_count("start openmoxie-server"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_times_out_when_container_never_runs() {
        let runner = ScriptedRunner::default();
        runner.on("name=openmoxie-server", ScriptedOutcome::ok(""));
        let (orch, _runner) = orchestrator(fast_config(), runner);

        let err = orch.start_container().await.unwrap_err();
        assert!(matches!(err, ControlError::StartTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_retries_failed_command_with_backoff() {
        let runner = ScriptedRunner::default();
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok(""),
                ScriptedOutcome::ok("openmoxie-server\n"),
            ],
        );
        runner.on_sequence(
            "start openmoxie-server",
            vec![ScriptedOutcome::fail(1), ScriptedOutcome::ok("")],
        );
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.start_container().await.unwrap();
        assert_eq!(runner.call_count("start openmoxie-server"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_exhausts_retry_budget() {
        let runner = ScriptedRunner::default();
        runner.on("name=openmoxie-server", ScriptedOutcome::ok(""));
        runner.on("start openmoxie-server", ScriptedOutcome::fail(1));
        let (orch, runner) = orchestrator(fast_config(), runner);

        let err = orch.start_container().await.unwrap_err();
        match err {
            ControlError::Orchestration { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected Orchestration, got {other}"),
        }
        assert_eq!(runner.call_count("start openmoxie-server"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_lifecycle_op_is_rejected() {
        let runner = ScriptedRunner::default();
        let (orch, _runner) = orchestrator(fast_config(), runner);

        let _held = orch.ops.try_lock().unwrap();

        let err = orch.start_container().await.unwrap_err();
        assert!(matches!(err, ControlError::OperationInProgress));

        let err = orch.stop_container().await.unwrap_err();
        assert!(matches!(err, ControlError::OperationInProgress));

        let err = orch.restart().await.unwrap_err();
        assert!(matches!(err, ControlError::OperationInProgress));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_when_not_running() {
        let runner = ScriptedRunner::default();
        runner.on("name=openmoxie-server", ScriptedOutcome::ok(""));
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.stop_container().await.unwrap();
        assert_eq!(runner.call_count("stop openmoxie-server"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_stops_then_starts() {
        let runner = ScriptedRunner::default();
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok("openmoxie-server\n"), // stop: is running
                ScriptedOutcome::ok(""),                   // start: not running yet
                ScriptedOutcome::ok("openmoxie-server\n"), // poll: running
            ],
        );
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.restart().await.unwrap();
        assert_eq!(runner.call_count("stop openmoxie-server"), 1);
        assert_eq!(runner.call_count("start openmoxie-server"), 1);
    }

    #[tokio::test]
    async fn test_setup_halts_at_installing_engine_when_engine_missing() {
        let runner = ScriptedRunner::default();
        runner.on("which docker", ScriptedOutcome::fail(1));
        let config = ContainerConfig {
            engine_paths: vec![PathBuf::from("/nonexistent/docker")],
            ..fast_config()
        };
        let (orch, _runner) = orchestrator(config, runner);

        let err = orch.run_setup(&CancellationToken::new()).await.unwrap_err();
        match err {
            ControlError::Setup { stage, .. } => {
                assert_eq!(stage, SetupStage::InstallingEngine);
            }
            other => panic!("expected Setup, got {other}"),
        }

        let progress = orch.setup_progress().borrow().clone();
        let failure = progress.failure.expect("failure recorded");
        assert_eq!(failure.stage, SetupStage::InstallingEngine);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_happy_path_reaches_complete() {
        let runner = ScriptedRunner::default();
        runner.on("ps -q", ScriptedOutcome::ok(""));
        runner.on(
            "name=openmoxie-mqtt",
            ScriptedOutcome::ok("openmoxie-mqtt\n"),
        );
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok(""),
                ScriptedOutcome::ok("openmoxie-server\n"),
            ],
        );
        let (orch, runner) = orchestrator(fast_config(), runner);

        orch.run_setup(&CancellationToken::new()).await.unwrap();

        let progress = orch.setup_progress().borrow().clone();
        assert_eq!(progress.stage, SetupStage::Complete);
        assert_eq!(progress.percent_complete, 100);
        assert!(progress.failure.is_none());
        assert_eq!(runner.call_count("start openmoxie-server"), 1);
        // Broker was already running — no broker start, no compose
        assert_eq!(runner.call_count("start openmoxie-mqtt"), 0);
        assert_eq!(runner.call_count("compose"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_falls_back_to_compose_for_broker() {
        let runner = ScriptedRunner::default();
        runner.on("ps -q", ScriptedOutcome::ok(""));
        runner.on("name=openmoxie-mqtt", ScriptedOutcome::ok(""));
        runner.on("start openmoxie-mqtt", ScriptedOutcome::fail(1));
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok(""),
                ScriptedOutcome::ok("openmoxie-server\n"),
            ],
        );
        let config = ContainerConfig {
            compose_file: Some(PathBuf::from("/home/user/OpenMoxie/docker-compose.yml")),
            ..fast_config()
        };
        let (orch, runner) = orchestrator(config, runner);

        orch.run_setup(&CancellationToken::new()).await.unwrap();
        assert_eq!(runner.call_count("compose -f"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_setup_leaves_no_failure() {
        let runner = ScriptedRunner::default();
        let (orch, _runner) = orchestrator(fast_config(), runner);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orch.run_setup(&cancel).await.unwrap_err();
        assert!(matches!(err, ControlError::Cancelled));
        assert!(orch.setup_progress().borrow().failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_poll_emits_on_change_only() {
        let runner = ScriptedRunner::default();
        runner.on_sequence(
            "ps -q",
            vec![
                ScriptedOutcome::ok(""),
                ScriptedOutcome::ok(""),
                ScriptedOutcome::fail(1),
            ],
        );
        let (orch, _runner) = orchestrator(fast_config(), runner);
        let orch = Arc::new(orch);

        let mut health = orch.subscribe_health();
        orch.spawn_health_poll(Duration::from_secs(1));

        let first = tokio::time::timeout(Duration::from_secs(30), health.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, ContainerHealth::Installed { running: true });

        // Second poll is identical and suppressed; third differs
        let second = tokio::time::timeout(Duration::from_secs(30), health.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, ContainerHealth::Installed { running: false });

        orch.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_starts_container_after_sustained_disconnect() {
        let runner = ScriptedRunner::default();
        runner.on_sequence(
            "name=openmoxie-server",
            vec![
                ScriptedOutcome::ok(""), // recovery check: not running
                ScriptedOutcome::ok(""), // start_container pre-check
                ScriptedOutcome::ok("openmoxie-server\n"),
            ],
        );
        let (orch, runner) = orchestrator(fast_config(), runner);
        let orch = Arc::new(orch);

        let (state_tx, state_rx) = broadcast::channel(8);
        orch.spawn_recovery(state_rx);

        state_tx.send(ConnectionState::Disconnected).unwrap();
        // Let the grace period and the start sequence play out
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(runner.call_count("start openmoxie-server"), 1);
        orch.shutdown().await;
    }
}
