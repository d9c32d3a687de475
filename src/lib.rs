//! # moxie-control
//!
//! Device control and backend-container orchestration core for the Moxie
//! companion robot.
//!
//! ## Overview
//!
//! `moxie-control` pairs a message-channel client — one durable
//! publish/subscribe connection to the robot's broker — with a container
//! orchestrator that detects, starts, and health-checks the local backend
//! runtime the robot depends on. The GUI, AI services, and safety logging
//! all sit outside this crate and consume its typed events and operations.
//!
//! ## Quick Start
//!
//! ```rust
//! use moxie_control::{
//!     BrokerConfig, ChannelClient, CommandIntent, MemoryTransport, MoveDirection,
//! };
//!
//! # async fn example() -> moxie_control::Result<()> {
//! // Swap MemoryTransport for MqttTransport against a real broker
//! let client = ChannelClient::new(BrokerConfig::default(), MemoryTransport::default());
//! client.connect().await?;
//!
//! client.send_command(&CommandIntent::Volume(50)).await?;
//! client
//!     .send_command(&CommandIntent::Move(MoveDirection::Forward))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Transport** trait — broker backends (`MqttTransport` for the wire,
//!   `MemoryTransport` for tests and offline use)
//! - **ChannelClient** — connection state machine, subscriber registry,
//!   auto-reconnect, command publication
//! - **CommandRunner** trait — subprocess seam for engine CLI commands
//! - **HealthMonitor** — engine discovery and tri-state health probes
//! - **Orchestrator** — first-run setup state machine plus serialized
//!   start/stop/restart with bounded retries
//! - **ConversationListener** — decodes telemetry topics into typed
//!   conversation events
//!
//! ## Health-check semantics
//!
//! `HealthMonitor::is_container_running` deliberately reads a failed
//! listing launch as "not running": for a health check, absence of
//! evidence is treated as absence, not as an error. A stricter
//! implementation could distinguish the two; this one keeps the original
//! behavior and pins it with tests.

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod listener;
pub mod monitor;
pub mod orchestrator;
pub mod process;
pub mod transport;
pub mod types;

// Re-export core types
pub use channel::{ChannelClient, SubscriberId};
pub use command::{
    ArmPosition, ArmSide, CommandIntent, Emotion, LookDirection, MoveDirection, RemoteChatEvent,
};
pub use config::{BrokerConfig, ContainerConfig, ControlConfig};
pub use error::{ControlError, Result};
pub use listener::{ConversationListener, ListenerEvent};
pub use monitor::HealthMonitor;
pub use orchestrator::Orchestrator;
pub use process::{CommandRunner, ProcessRunner, RunOutput, ScriptedOutcome, ScriptedRunner};
pub use types::{
    ConnectionState, ContainerHealth, ConversationEvent, ConversationKind, InboundMessage,
    SetupFailure, SetupProgress, SetupStage,
};

// Re-export transports for convenience
pub use transport::memory::MemoryTransport;
pub use transport::mqtt::MqttTransport;
pub use transport::{LinkEvent, Transport, TransportEvents, TransportSink};
