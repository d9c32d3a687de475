//! Conversation listener — decodes robot telemetry into typed events
//!
//! Subscribes through the channel client to the fixed telemetry topics
//! and fans decoded `ConversationEvent`s out to observers. Performs no
//! reconnection of its own: the client re-arms its subscription on every
//! reconnect.

use crate::channel::{ChannelClient, SubscriberId};
use crate::types::{ConnectionState, ConversationEvent, ConversationKind, InboundMessage};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Capacity of the listener's event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Something the listener wants observers to know
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// A decoded conversation/telemetry event
    Conversation(ConversationEvent),

    /// The listener hit a problem worth surfacing (it keeps running)
    Error { message: String },
}

/// Listener for the robot's conversation and telemetry topics
pub struct ConversationListener {
    client: ChannelClient,
    events: broadcast::Sender<ListenerEvent>,
    subscriptions: Mutex<Vec<SubscriberId>>,
    message_count: Arc<AtomicU64>,
    last_received: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl ConversationListener {
    pub fn new(client: ChannelClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            events,
            subscriptions: Mutex::new(Vec::new()),
            message_count: Arc::new(AtomicU64::new(0)),
            last_received: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Receive decoded events and listener errors
    pub fn subscribe_events(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Messages decoded since the listener was created
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    /// Arrival time of the most recent decoded message
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        *self.last_received.lock().unwrap()
    }

    /// Arm the telemetry subscriptions; idempotent
    ///
    /// When the client is not connected this still registers (the client
    /// arms the filters on its next connect) and reports an observable
    /// error event instead of failing.
    pub async fn start_listening(&self) {
        let mut subs = self.subscriptions.lock().await;
        if !subs.is_empty() {
            return;
        }

        if self.client.state() != ConnectionState::Connected {
            let message =
                "channel is not connected; conversation events will arrive after it connects"
                    .to_string();
            tracing::warn!("{message}");
            let _ = self.events.send(ListenerEvent::Error { message });
        }

        let config = self.client.config().clone();
        let conversation_prefix = config.conversation_prefix.clone();
        let wakeword_topic = config.wakeword_topic();
        let chat_response_suffix = "/commands/remote_chat".to_string();

        for filter in config.telemetry_filters() {
            let events = self.events.clone();
            let prefix = conversation_prefix.clone();
            let wakeword = wakeword_topic.clone();
            let chat_suffix = chat_response_suffix.clone();
            let count = self.message_count.clone();
            let last = self.last_received.clone();

            let id = self
                .client
                .subscribe(&filter, move |msg| {
                    if let Some(event) = decode(msg, &prefix, &wakeword, &chat_suffix) {
                        count.fetch_add(1, Ordering::SeqCst);
                        *last.lock().unwrap() = Some(event.received_at);
                        let _ = events.send(ListenerEvent::Conversation(event));
                    }
                    Ok(())
                })
                .await;
            subs.push(id);
        }

        tracing::info!(filters = subs.len(), "Conversation listener armed");
    }

    /// Disarm the telemetry subscriptions; idempotent
    pub async fn stop_listening(&self) {
        let ids: Vec<SubscriberId> = self.subscriptions.lock().await.drain(..).collect();
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.client.unsubscribe(id).await;
        }
        tracing::info!("Conversation listener disarmed");
    }

    /// Whether the listener currently has subscriptions armed
    pub async fn is_listening(&self) -> bool {
        !self.subscriptions.lock().await.is_empty()
    }
}

/// Decode one raw message into a conversation event
///
/// Unrecognized topics and malformed payloads yield `None`; a telemetry
/// stream always carries some noise and none of it is an error.
fn decode(
    msg: &InboundMessage,
    conversation_prefix: &str,
    wakeword_topic: &str,
    chat_response_suffix: &str,
) -> Option<ConversationEvent> {
    let raw = msg.payload_str();

    let kind = if msg.topic == wakeword_topic {
        ConversationKind::WakeWord
    } else if msg.topic.ends_with(chat_response_suffix) {
        // Backend remote-chat response: the spoken answer is at output.text
        let json: serde_json::Value = serde_json::from_str(&raw).ok()?;
        let text = json.get("output")?.get("text")?.as_str()?.to_string();
        ConversationKind::AssistantSpeech { text }
    } else if let Some(suffix) = msg
        .topic
        .strip_prefix(conversation_prefix)
        .and_then(|s| s.strip_prefix('/'))
    {
        match suffix {
            "user" => ConversationKind::UserSpeech {
                text: text_field(&raw)?,
            },
            "assistant" => ConversationKind::AssistantSpeech {
                text: text_field(&raw)?,
            },
            "start" => ConversationKind::Started,
            "metadata" => {
                let json: serde_json::Value = serde_json::from_str(&raw).ok()?;
                ConversationKind::Metadata {
                    personality: json
                        .get("personality")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    emoji: json
                        .get("personality_emoji")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                }
            }
            other => {
                tracing::debug!(topic = %msg.topic, suffix = other, "Ignoring unrecognized conversation topic");
                return None;
            }
        }
    } else {
        return None;
    };

    Some(ConversationEvent {
        topic: msg.topic.clone(),
        raw_payload: raw,
        received_at: msg.received_at,
        kind,
    })
}

fn text_field(raw: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(raw).ok()?;
    json.get("text").and_then(|v| v.as_str()).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(topic, payload.as_bytes().to_vec())
    }

    const PREFIX: &str = "moxie/conversation";
    const WAKEWORD: &str = "/devices/d_openmoxie/wakeword";
    const CHAT_SUFFIX: &str = "/commands/remote_chat";

    fn decode_default(m: &InboundMessage) -> Option<ConversationEvent> {
        decode(m, PREFIX, WAKEWORD, CHAT_SUFFIX)
    }

    #[test]
    fn test_decodes_user_speech() {
        let event = decode_default(&msg(
            "moxie/conversation/user",
            r#"{"text":"what's the biggest dinosaur?"}"#,
        ))
        .unwrap();
        assert_eq!(
            event.kind,
            ConversationKind::UserSpeech {
                text: "what's the biggest dinosaur?".into()
            }
        );
        assert_eq!(event.topic, "moxie/conversation/user");
    }

    #[test]
    fn test_decodes_assistant_speech() {
        let event = decode_default(&msg(
            "moxie/conversation/assistant",
            r#"{"text":"The Argentinosaurus!"}"#,
        ))
        .unwrap();
        assert_eq!(
            event.kind,
            ConversationKind::AssistantSpeech {
                text: "The Argentinosaurus!".into()
            }
        );
    }

    #[test]
    fn test_decodes_start_and_metadata() {
        let start = decode_default(&msg("moxie/conversation/start", "{}")).unwrap();
        assert_eq!(start.kind, ConversationKind::Started);

        let metadata = decode_default(&msg(
            "moxie/conversation/metadata",
            r#"{"personality":"Storyteller","personality_emoji":"📚"}"#,
        ))
        .unwrap();
        assert_eq!(
            metadata.kind,
            ConversationKind::Metadata {
                personality: Some("Storyteller".into()),
                emoji: Some("📚".into()),
            }
        );
    }

    #[test]
    fn test_decodes_wakeword_and_chat_response() {
        let wake = decode_default(&msg(WAKEWORD, "")).unwrap();
        assert_eq!(wake.kind, ConversationKind::WakeWord);

        let chat = decode_default(&msg(
            "/devices/d_openmoxie/commands/remote_chat",
            r#"{"output":{"text":"Once upon a time…"},"response_actions":[]}"#,
        ))
        .unwrap();
        assert_eq!(
            chat.kind,
            ConversationKind::AssistantSpeech {
                text: "Once upon a time…".into()
            }
        );
    }

    #[test]
    fn test_ignores_unrecognized_topics_and_noise() {
        assert!(decode_default(&msg("moxie/status", "{}")).is_none());
        assert!(decode_default(&msg("moxie/conversation/other", "{}")).is_none());
        assert!(decode_default(&msg("moxie/conversation/user", "not json")).is_none());
        assert!(decode_default(&msg("moxie/conversation/user", r#"{"no_text":1}"#)).is_none());
    }
}
