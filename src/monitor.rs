//! Engine and container health probing
//!
//! Stateless probes over the command runner. Polling cadence and retry
//! policy live in the orchestrator, not here.

use crate::config::ContainerConfig;
use crate::process::CommandRunner;
use crate::types::ContainerHealth;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Health monitor for the container engine and its containers
pub struct HealthMonitor {
    config: ContainerConfig,
    runner: Arc<dyn CommandRunner>,
}

impl HealthMonitor {
    pub fn new(config: ContainerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Locate the engine binary
    ///
    /// Checks the configured well-known paths in priority order, then
    /// falls back to a PATH lookup via `which`.
    pub async fn locate_engine(&self) -> Option<PathBuf> {
        for path in &self.config.engine_paths {
            if path.exists() {
                return Some(path.clone());
            }
        }

        let out = self
            .runner
            .run(
                Path::new("which"),
                &[self.config.engine_binary.as_str()],
                self.config.health_timeout(),
            )
            .await
            .ok()?;

        if !out.success() {
            return None;
        }

        let line = out.stdout.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            None
        } else {
            Some(PathBuf::from(line))
        }
    }

    /// Probe engine installation and daemon state
    pub async fn check_engine_health(&self) -> ContainerHealth {
        let Some(engine) = self.locate_engine().await else {
            return ContainerHealth::NotInstalled;
        };

        match self
            .runner
            .run(&engine, &["ps", "-q"], self.config.health_timeout())
            .await
        {
            Ok(out) if out.success() => ContainerHealth::Installed { running: true },
            Ok(_) => ContainerHealth::Installed { running: false },
            Err(e) => ContainerHealth::Unknown {
                detail: e.to_string(),
            },
        }
    }

    /// True iff the backend server container shows up in the listing
    pub async fn is_target_container_running(&self) -> bool {
        self.is_container_running(&self.config.container_name).await
    }

    /// True iff a container with `name` shows up in the listing
    ///
    /// Launch failures read as not-running: for a health check, absence
    /// of evidence is not an error.
    pub async fn is_container_running(&self, name: &str) -> bool {
        let Some(engine) = self.locate_engine().await else {
            return false;
        };

        let filter = format!("name={name}");
        match self
            .runner
            .run(
                &engine,
                &["ps", "--filter", &filter, "--format", "{{.Names}}"],
                self.config.health_timeout(),
            )
            .await
        {
            Ok(out) => out.stdout.contains(name),
            Err(e) => {
                tracing::debug!(container = name, error = %e, "Listing probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ScriptedOutcome, ScriptedRunner};

    fn monitor_with(config: ContainerConfig, runner: ScriptedRunner) -> HealthMonitor {
        HealthMonitor::new(config, Arc::new(runner))
    }

    /// Config whose engine path always resolves without touching PATH
    fn installed_config() -> ContainerConfig {
        ContainerConfig {
            engine_paths: vec![PathBuf::from("/bin/sh")],
            ..ContainerConfig::default()
        }
    }

    fn missing_engine_config() -> ContainerConfig {
        ContainerConfig {
            engine_paths: vec![PathBuf::from("/nonexistent/docker")],
            ..ContainerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_not_installed_when_no_path_and_which_fails() {
        let runner = ScriptedRunner::default();
        runner.on("which docker", ScriptedOutcome::fail(1));
        let monitor = monitor_with(missing_engine_config(), runner);

        assert_eq!(monitor.locate_engine().await, None);
        assert_eq!(
            monitor.check_engine_health().await,
            ContainerHealth::NotInstalled
        );
    }

    #[tokio::test]
    async fn test_locate_engine_via_path_lookup() {
        let runner = ScriptedRunner::default();
        runner.on("which docker", ScriptedOutcome::ok("/usr/bin/docker\n"));
        let monitor = monitor_with(missing_engine_config(), runner);

        assert_eq!(
            monitor.locate_engine().await,
            Some(PathBuf::from("/usr/bin/docker"))
        );
    }

    #[tokio::test]
    async fn test_daemon_running() {
        let runner = ScriptedRunner::default();
        runner.on("ps -q", ScriptedOutcome::ok(""));
        let monitor = monitor_with(installed_config(), runner);

        assert_eq!(
            monitor.check_engine_health().await,
            ContainerHealth::Installed { running: true }
        );
    }

    #[tokio::test]
    async fn test_daemon_down_when_probe_exits_nonzero() {
        let runner = ScriptedRunner::default();
        runner.on("ps -q", ScriptedOutcome::fail(1));
        let monitor = monitor_with(installed_config(), runner);

        assert_eq!(
            monitor.check_engine_health().await,
            ContainerHealth::Installed { running: false }
        );
    }

    #[tokio::test]
    async fn test_probe_launch_failure_is_unknown() {
        let runner = ScriptedRunner::default();
        runner.on(
            "ps -q",
            ScriptedOutcome::LaunchFailure("permission denied".into()),
        );
        let monitor = monitor_with(installed_config(), runner);

        match monitor.check_engine_health().await {
            ContainerHealth::Unknown { detail } => {
                assert!(detail.contains("permission denied"));
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_container_running_iff_name_in_listing() {
        let runner = ScriptedRunner::default();
        runner.on(
            "--filter name=openmoxie-server",
            ScriptedOutcome::ok("openmoxie-server\n"),
        );
        let monitor = monitor_with(installed_config(), runner);
        assert!(monitor.is_target_container_running().await);
    }

    #[tokio::test]
    async fn test_container_not_running_on_empty_listing() {
        let runner = ScriptedRunner::default();
        runner.on("--filter name=openmoxie-server", ScriptedOutcome::ok(""));
        let monitor = monitor_with(installed_config(), runner);
        assert!(!monitor.is_target_container_running().await);
    }

    #[tokio::test]
    async fn test_container_listing_launch_failure_reads_as_not_running() {
        let runner = ScriptedRunner::default();
        runner.on(
            "--filter name=openmoxie-server",
            ScriptedOutcome::LaunchFailure("daemon socket gone".into()),
        );
        let monitor = monitor_with(installed_config(), runner);
        assert!(!monitor.is_target_container_running().await);
    }
}
