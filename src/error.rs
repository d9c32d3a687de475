//! Error types for moxie-control

use crate::types::SetupStage;
use thiserror::Error;

/// Errors that can occur in the control core
#[derive(Debug, Error)]
pub enum ControlError {
    /// Subprocess could not be spawned (engine missing, permission denied)
    #[error("failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    /// Subprocess did not exit within the caller-imposed timeout
    #[error("'{program}' did not exit within {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    /// Publish attempted while the channel is not connected
    #[error("channel is not connected")]
    NotConnected,

    /// Broker transport failure (connect, session refused, link error)
    #[error("connection error: {0}")]
    Connection(String),

    /// Command intent failed validation before encoding
    #[error("invalid value '{value}' for parameter '{parameter}'")]
    InvalidParameter { parameter: String, value: String },

    /// Publish failure on a live connection
    #[error("failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribe failure on a live connection
    #[error("failed to subscribe to '{filter}': {reason}")]
    Subscribe { filter: String, reason: String },

    /// Container never reached running state within the poll budget
    #[error("container '{container}' did not reach running state in time")]
    StartTimeout { container: String },

    /// A lifecycle operation is already in flight
    #[error("another lifecycle operation is already in flight")]
    OperationInProgress,

    /// Steady-state lifecycle operation exhausted its retry budget
    #[error("{op} failed after {attempts} attempts: {reason}")]
    Orchestration {
        op: String,
        attempts: u32,
        reason: String,
    },

    /// First-run setup failed; the run is terminal
    #[error("setup failed during {stage}: {reason}")]
    Setup { stage: SetupStage, reason: String },

    /// Caller-initiated cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem/IO failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
