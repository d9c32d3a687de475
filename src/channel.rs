//! Message channel client — the single authoritative broker connection
//!
//! Owns the connection state machine, the subscriber registry, and the
//! reconnect loop. Everything else in the process observes the channel
//! through state events and registered subscribers; nothing else touches
//! the wire.

use crate::command::{CommandIntent, RemoteChatEvent};
use crate::config::BrokerConfig;
use crate::error::{ControlError, Result};
use crate::transport::{topic_matches, LinkEvent, Transport, TransportEvents, TransportSink};
use crate::types::{ConnectionState, InboundMessage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Capacity of the connection-state broadcast channel
const STATE_CAPACITY: usize = 64;

/// Consecutive failed reconnect attempts before escalating to warn
const ESCALATION_THRESHOLD: u32 = 5;

/// Handle for a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Handler = Arc<dyn Fn(&InboundMessage) -> Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriberId,
    filter: String,
    handler: Handler,
}

/// Client for the device's publish/subscribe channel
///
/// Cheap to clone; all clones share the one connection.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    state: RwLock<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    sink: RwLock<Option<Arc<dyn TransportSink>>>,
    /// Cleared by a manual disconnect; set again by connect
    auto_reconnect: AtomicBool,
    event_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect/disconnect sequences
    gate: Mutex<()>,
}

impl ChannelClient {
    pub fn new(config: BrokerConfig, transport: impl Transport + 'static) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport: Arc::new(transport),
                state: RwLock::new(ConnectionState::Disconnected),
                state_tx,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
                sink: RwLock::new(None),
                auto_reconnect: AtomicBool::new(true),
                event_task: Mutex::new(None),
                gate: Mutex::new(()),
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.current()
    }

    /// Receive every state transition, in the order it happened
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Establish the broker connection
    ///
    /// No-op returning the current state while already Connecting or
    /// Connected. On success the dispatch task owns the link and keeps
    /// reconnecting after unexpected drops until `disconnect`.
    pub async fn connect(&self) -> Result<ConnectionState> {
        self.inner.config.validate()?;
        let _gate = self.inner.gate.lock().await;

        {
            let task = self.inner.event_task.lock().await;
            if let Some(handle) = task.as_ref() {
                if !handle.is_finished() {
                    return Ok(self.inner.current());
                }
            }
        }
        if self.inner.current() != ConnectionState::Disconnected {
            return Ok(self.inner.current());
        }

        self.inner.auto_reconnect.store(true, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        match self.inner.establish().await {
            Ok(events) => {
                self.inner.set_state(ConnectionState::Connected);
                let handle = tokio::spawn(run_link(self.inner.clone(), events));
                *self.inner.event_task.lock().await = Some(handle);
                Ok(ConnectionState::Connected)
            }
            Err(e) => {
                self.inner.clear_sink();
                self.inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Tear the connection down
    ///
    /// Idempotent; suppresses auto-reconnect until the next `connect`.
    pub async fn disconnect(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);

        let handle = self.inner.event_task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let _gate = self.inner.gate.lock().await;
        let sink = self.inner.take_sink();
        if let Some(sink) = sink {
            if let Err(e) = sink.disconnect().await {
                tracing::debug!(error = %e, "Sink teardown failed");
            }
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Publish a payload on a topic
    ///
    /// Fails with `NotConnected` before any transport I/O when the
    /// channel is not Connected.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        if self.inner.current() != ConnectionState::Connected {
            return Err(ControlError::NotConnected);
        }
        let sink = self
            .inner
            .sink
            .read()
            .unwrap()
            .clone()
            .ok_or(ControlError::NotConnected)?;
        sink.publish(topic, payload.into()).await
    }

    /// Encode a control intent and publish it on the command topic
    pub async fn send_command(&self, intent: &CommandIntent) -> Result<()> {
        let payload = intent.encode()?;
        tracing::debug!(kind = intent.kind(), payload = %payload, "Sending control command");
        self.publish(&self.inner.config.command_topic, payload.into_bytes())
            .await
    }

    /// Publish a remote-chat event for a line of speech
    pub async fn send_chat(&self, speech: &str) -> Result<()> {
        let event = RemoteChatEvent::for_speech(speech);
        let payload = serde_json::to_vec(&event)?;
        self.publish(&self.inner.config.remote_chat_topic(), payload)
            .await
    }

    /// Register a subscriber for a topic filter
    ///
    /// Registration always succeeds; the transport-side subscription is
    /// armed immediately when connected and re-armed on every reconnect.
    pub async fn subscribe<F>(&self, filter: &str, handler: F) -> SubscriberId
    where
        F: Fn(&InboundMessage) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.subscribers.write().unwrap().push(Subscriber {
            id,
            filter: filter.to_string(),
            handler: Arc::new(handler),
        });

        let sink = self.inner.sink.read().unwrap().clone();
        if let Some(sink) = sink {
            if let Err(e) = sink.subscribe(filter).await {
                tracing::warn!(filter, error = %e, "Could not arm subscription now; will re-arm on reconnect");
            }
        }

        tracing::debug!(filter, id = id.0, "Subscriber registered");
        id
    }

    /// Remove a subscriber; idempotent
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let filter = {
            let mut subs = self.inner.subscribers.write().unwrap();
            match subs.iter().position(|s| s.id == id) {
                Some(pos) => Some(subs.remove(pos).filter),
                None => None,
            }
        };

        let Some(filter) = filter else { return };

        let still_used = self
            .inner
            .subscribers
            .read()
            .unwrap()
            .iter()
            .any(|s| s.filter == filter);
        if !still_used {
            let sink = self.inner.sink.read().unwrap().clone();
            if let Some(sink) = sink {
                if let Err(e) = sink.unsubscribe(&filter).await {
                    tracing::debug!(filter = %filter, error = %e, "Unsubscribe failed");
                }
            }
        }
    }

    /// The broker configuration this client was built with
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }
}

impl ClientInner {
    fn current(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    /// Transition and emit; the write lock keeps emissions totally ordered
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().unwrap();
        if *state != next {
            *state = next;
            let _ = self.state_tx.send(next);
        }
    }

    fn clear_sink(&self) {
        *self.sink.write().unwrap() = None;
    }

    fn take_sink(&self) -> Option<Arc<dyn TransportSink>> {
        self.sink.write().unwrap().take()
    }

    fn distinct_filters(&self) -> Vec<String> {
        let subs = self.subscribers.read().unwrap();
        let mut filters: Vec<String> = subs.iter().map(|s| s.filter.clone()).collect();
        filters.sort();
        filters.dedup();
        filters
    }

    /// Open a link and re-arm every registered filter on it
    async fn establish(&self) -> Result<Box<dyn TransportEvents>> {
        let (sink, events) = self.transport.connect().await?;
        for filter in self.distinct_filters() {
            sink.subscribe(&filter).await?;
        }
        *self.sink.write().unwrap() = Some(sink);
        Ok(events)
    }

    /// Deliver one message to every matching subscriber, in order
    ///
    /// A failing handler is logged and skipped; it never blocks delivery
    /// to the rest or corrupts the connection.
    fn dispatch(&self, msg: &InboundMessage) {
        let handlers: Vec<(SubscriberId, Handler)> = self
            .subscribers
            .read()
            .unwrap()
            .iter()
            .filter(|s| topic_matches(&s.filter, &msg.topic))
            .map(|s| (s.id, s.handler.clone()))
            .collect();

        for (id, handler) in handlers {
            if let Err(e) = (*handler)(msg) {
                tracing::warn!(
                    subscriber = id.0,
                    topic = %msg.topic,
                    error = %e,
                    "Subscriber failed; continuing delivery"
                );
            }
        }
    }
}

/// Dispatch loop for a live link, plus the reconnect loop after drops
async fn run_link(inner: Arc<ClientInner>, mut events: Box<dyn TransportEvents>) {
    loop {
        let reason = loop {
            match events.next().await {
                Some(LinkEvent::Message(msg)) => inner.dispatch(&msg),
                Some(LinkEvent::Closed { reason }) => break reason,
                None => break "link stream ended".to_string(),
            }
        };

        inner.clear_sink();
        inner.set_state(ConnectionState::Disconnected);

        if !inner.auto_reconnect.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(reason = %reason, "Broker link lost; reconnecting");

        let max = inner.config.reconnect_max();
        let mut backoff = inner.config.reconnect_initial();
        let mut failures: u32 = 0;

        events = loop {
            tokio::time::sleep(backoff).await;
            if !inner.auto_reconnect.load(Ordering::SeqCst) {
                return;
            }

            inner.set_state(ConnectionState::Connecting);
            match inner.establish().await {
                Ok(events) => {
                    inner.set_state(ConnectionState::Connected);
                    tracing::info!("Broker link restored");
                    break events;
                }
                Err(e) => {
                    inner.clear_sink();
                    inner.set_state(ConnectionState::Disconnected);
                    failures += 1;
                    if failures == ESCALATION_THRESHOLD {
                        tracing::warn!(failures, error = %e, "Reconnect is not making progress");
                    } else {
                        tracing::debug!(failures, error = %e, "Reconnect attempt failed");
                    }
                    backoff = (backoff * 2).min(max);
                }
            }
        };
    }
}
