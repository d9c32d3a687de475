//! Broker transport — the seam between the channel client and the wire
//!
//! All broker backends implement `Transport`. A successful connect hands
//! back a cloneable sink for outbound traffic and an event stream the
//! client's dispatch task consumes. The MQTT backend talks to the real
//! broker; the memory backend is an in-process loopback for tests and
//! offline use.

use crate::error::Result;
use crate::types::InboundMessage;
use async_trait::async_trait;
use std::sync::Arc;

pub mod memory;
pub mod mqtt;

/// A broker backend that can open links
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connected link
    ///
    /// Resolves only once the broker has accepted the session; a failed
    /// or timed-out attempt returns `Connection`.
    async fn connect(&self) -> Result<(Arc<dyn TransportSink>, Box<dyn TransportEvents>)>;
}

/// Outbound half of a live link
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, filter: &str) -> Result<()>;

    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    /// Graceful teardown of the link
    async fn disconnect(&self) -> Result<()>;
}

/// Inbound half of a live link
///
/// `next` yields messages in network-arrival order; a `Closed` event (or
/// `None`) is terminal for the link.
#[async_trait]
pub trait TransportEvents: Send {
    async fn next(&mut self) -> Option<LinkEvent>;
}

/// Something that happened on a live link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A message arrived on a subscribed topic
    Message(InboundMessage),

    /// The link is gone; the client decides whether to reconnect
    Closed { reason: String },
}

/// MQTT-style topic filter matching
///
/// `+` matches exactly one level, `#` (final level only) matches the
/// rest. Used both by the memory broker and the client's subscriber
/// dispatch.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return filter_parts.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
