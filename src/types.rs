//! Core state and value types for the control core
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state of the message channel
///
/// Owned exclusively by the `ChannelClient`; every transition is emitted
/// on its state channel in the exact order it occurred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Short lowercase label for logs and status displays
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Tri-state assessment of the backend engine and container
///
/// Produced fresh on every poll, never mutated in place. `Unknown` is
/// never upgraded to healthy or unhealthy — callers must treat it as
/// "retry or ask the user".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ContainerHealth {
    /// No engine binary found at any well-known path or on PATH
    NotInstalled,
    /// Engine binary present; `running` reflects the daemon probe
    Installed { running: bool },
    /// The probe itself failed to run
    Unknown { detail: String },
}

impl ContainerHealth {
    /// True only for `Installed { running: true }`
    pub fn is_operational(&self) -> bool {
        matches!(self, ContainerHealth::Installed { running: true })
    }
}

/// A raw message delivered by the broker transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the message arrived on
    pub topic: String,

    /// Raw payload bytes
    pub payload: Vec<u8>,

    /// Arrival timestamp
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a message stamped with the current time
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload as lossy UTF-8
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A decoded conversation/telemetry event from the robot
///
/// Created on arrival, handed to subscribers, not retained by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEvent {
    /// Topic the source message arrived on
    pub topic: String,

    /// Raw payload as text
    pub raw_payload: String,

    /// Arrival timestamp
    pub received_at: DateTime<Utc>,

    /// Parsed event content
    pub kind: ConversationKind,
}

/// Parsed content of a conversation event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationKind {
    /// The child spoke to the robot
    UserSpeech { text: String },

    /// The robot answered
    AssistantSpeech { text: String },

    /// A new conversation began
    Started,

    /// Session metadata (active personality and its emoji)
    Metadata {
        personality: Option<String>,
        emoji: Option<String>,
    },

    /// The wake word was detected
    WakeWord,
}

/// Stages of the first-run setup state machine
///
/// Forward order: Idle → CheckingPrerequisites → InstallingEngine →
/// InstallingBroker → StartingContainer → Verifying → Complete. A failure
/// at any step is absorbing for that run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SetupStage {
    #[default]
    Idle,
    CheckingPrerequisites,
    InstallingEngine,
    InstallingBroker,
    StartingContainer,
    Verifying,
    Complete,
}

impl SetupStage {
    pub fn label(&self) -> &'static str {
        match self {
            SetupStage::Idle => "idle",
            SetupStage::CheckingPrerequisites => "checking-prerequisites",
            SetupStage::InstallingEngine => "installing-engine",
            SetupStage::InstallingBroker => "installing-broker",
            SetupStage::StartingContainer => "starting-container",
            SetupStage::Verifying => "verifying",
            SetupStage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for SetupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A terminal setup failure, carrying the stage it occurred in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupFailure {
    pub stage: SetupStage,
    pub message: String,
}

/// Progress of an in-flight setup run
///
/// Single-writer (the orchestrator), multi-reader via a watch channel.
/// Reset to idle when a new run begins; discarded on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupProgress {
    /// Stage currently executing (or reached, for Complete)
    pub stage: SetupStage,

    /// Rough completion percentage for progress displays
    pub percent_complete: u8,

    /// Set when the run ended in failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SetupFailure>,
}
