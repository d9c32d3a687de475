//! Configuration for the broker channel and the container orchestrator
//!
//! Topic names, container names, and engine locations are deployment
//! configuration, not protocol — nothing in the core hardcodes them.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the control core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub container: ContainerConfig,
}

impl ControlConfig {
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.container.validate()
    }
}

/// Broker connection and topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Broker hostname or IP
    #[serde(default = "default_host")]
    pub host: String,

    /// Broker port (1883 plain, 8883 TLS)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use TLS for the broker connection
    #[serde(default)]
    pub use_tls: bool,

    /// CA certificate to trust when TLS is enabled (self-signed brokers)
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Prefix for the generated per-process client id
    #[serde(default = "default_client_prefix")]
    pub client_id_prefix: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// How long a connect attempt may take before it counts as failed
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Device identifier used in per-device topic paths
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Topic control command payloads are published to
    #[serde(default = "default_command_topic")]
    pub command_topic: String,

    /// Root of the conversation telemetry topics
    #[serde(default = "default_conversation_prefix")]
    pub conversation_prefix: String,

    /// First reconnect delay after an unexpected drop
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,

    /// Cap on the doubling reconnect delay
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            use_tls: false,
            ca_file: None,
            username: default_username(),
            password: String::new(),
            client_id_prefix: default_client_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            device_id: default_device_id(),
            command_topic: default_command_topic(),
            conversation_prefix: default_conversation_prefix(),
            reconnect_initial_secs: default_reconnect_initial(),
            reconnect_max_secs: default_reconnect_max(),
        }
    }
}

impl BrokerConfig {
    /// Fresh per-process client id
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, uuid::Uuid::new_v4())
    }

    /// Topic remote-chat events are published to
    pub fn remote_chat_topic(&self) -> String {
        format!("/devices/{}/events/remote-chat", self.device_id)
    }

    /// Filter covering the backend's command responses
    pub fn command_response_filter(&self) -> String {
        format!("/devices/{}/commands/+", self.device_id)
    }

    /// Topic the wake-word notification arrives on
    pub fn wakeword_topic(&self) -> String {
        format!("/devices/{}/wakeword", self.device_id)
    }

    /// Filter covering all conversation telemetry
    pub fn conversation_filter(&self) -> String {
        format!("{}/#", self.conversation_prefix)
    }

    /// The fixed set of telemetry filters the listener arms
    pub fn telemetry_filters(&self) -> Vec<String> {
        vec![
            self.conversation_filter(),
            self.command_response_filter(),
            self.wakeword_topic(),
        ]
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs.max(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs.max(self.reconnect_initial_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ControlError::Config("broker host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ControlError::Config("broker port must not be 0".into()));
        }
        if self.use_tls && self.ca_file.is_none() {
            return Err(ControlError::Config(
                "tls enabled but no ca certificate configured".into(),
            ));
        }
        if self.command_topic.is_empty() || self.conversation_prefix.is_empty() {
            return Err(ControlError::Config("topics must not be empty".into()));
        }
        Ok(())
    }
}

/// Backend container and engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerConfig {
    /// Name of the backend server container
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Name of the broker container the backend depends on
    #[serde(default = "default_broker_container")]
    pub broker_container: String,

    /// Engine binary name for the PATH-lookup fallback
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,

    /// Well-known engine locations, highest priority first
    #[serde(default = "default_engine_paths")]
    pub engine_paths: Vec<PathBuf>,

    /// Command that starts the engine daemon when it is installed but down
    #[serde(default = "default_engine_start_command")]
    pub engine_start_command: Option<Vec<String>>,

    /// Compose file used to create the containers on first run
    #[serde(default = "default_compose_file")]
    pub compose_file: Option<PathBuf>,

    /// Timeout for lightweight health-check commands
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    /// Timeout for heavyweight commands (image pulls, compose up)
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    /// Attempts for the start command before giving up
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,

    /// First delay between start attempts; doubles per attempt
    #[serde(default = "default_start_backoff")]
    pub start_backoff_secs: u64,

    /// Running-state polls after a start command
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Delay between running-state polls
    #[serde(default = "default_verify_interval")]
    pub verify_interval_secs: u64,

    /// Daemon polls while waiting for the engine to come up
    #[serde(default = "default_engine_wait_attempts")]
    pub engine_wait_attempts: u32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            broker_container: default_broker_container(),
            engine_binary: default_engine_binary(),
            engine_paths: default_engine_paths(),
            engine_start_command: default_engine_start_command(),
            compose_file: default_compose_file(),
            health_timeout_secs: default_health_timeout(),
            install_timeout_secs: default_install_timeout(),
            start_attempts: default_start_attempts(),
            start_backoff_secs: default_start_backoff(),
            verify_attempts: default_verify_attempts(),
            verify_interval_secs: default_verify_interval(),
            engine_wait_attempts: default_engine_wait_attempts(),
        }
    }
}

impl ContainerConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn start_backoff(&self) -> Duration {
        Duration::from_secs(self.start_backoff_secs.max(1))
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_name.is_empty() {
            return Err(ControlError::Config("container name must not be empty".into()));
        }
        if self.engine_binary.is_empty() {
            return Err(ControlError::Config("engine binary must not be empty".into()));
        }
        if self.start_attempts == 0 || self.verify_attempts == 0 {
            return Err(ControlError::Config(
                "attempt counts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    1883
}
fn default_username() -> String {
    // The backend broker accepts any credentials; it matches the
    // device firmware's defaults.
    "unknown".into()
}
fn default_client_prefix() -> String {
    "moxie-control".into()
}
fn default_keep_alive() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_device_id() -> String {
    "d_openmoxie".into()
}
fn default_command_topic() -> String {
    "moxie/command".into()
}
fn default_conversation_prefix() -> String {
    "moxie/conversation".into()
}
fn default_reconnect_initial() -> u64 {
    1
}
fn default_reconnect_max() -> u64 {
    60
}

fn default_container_name() -> String {
    "openmoxie-server".into()
}
fn default_broker_container() -> String {
    "openmoxie-mqtt".into()
}
fn default_engine_binary() -> String {
    "docker".into()
}
fn default_engine_paths() -> Vec<PathBuf> {
    [
        "/usr/local/bin/docker",
        "/opt/homebrew/bin/docker",
        "/usr/bin/docker",
        "/Applications/Docker.app/Contents/Resources/bin/docker",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}
fn default_engine_start_command() -> Option<Vec<String>> {
    if cfg!(target_os = "macos") {
        Some(vec!["open".into(), "-a".into(), "Docker".into()])
    } else {
        None
    }
}
fn default_compose_file() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join("OpenMoxie").join("docker-compose.yml"))
}
fn default_health_timeout() -> u64 {
    10
}
fn default_install_timeout() -> u64 {
    300
}
fn default_start_attempts() -> u32 {
    3
}
fn default_start_backoff() -> u64 {
    2
}
fn default_verify_attempts() -> u32 {
    10
}
fn default_verify_interval() -> u64 {
    2
}
fn default_engine_wait_attempts() -> u32 {
    15
}
