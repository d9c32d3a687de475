//! In-process loopback transport for tests and offline use
//!
//! A tiny broker: links subscribe with MQTT-style filters, publishes are
//! delivered to every matching live link, and tests can inject traffic
//! or sever links to exercise the client's reconnect path.

use super::{topic_matches, LinkEvent, Transport, TransportEvents, TransportSink};
use crate::error::{ControlError, Result};
use crate::types::InboundMessage;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Loopback broker transport
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

struct Hub {
    online: AtomicBool,
    next_link: AtomicU64,
    links: Mutex<Vec<Link>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

struct Link {
    id: u64,
    filters: HashSet<String>,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            hub: Arc::new(Hub {
                online: AtomicBool::new(true),
                next_link: AtomicU64::new(0),
                links: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl MemoryTransport {
    /// Make subsequent connect attempts succeed or fail
    pub fn set_online(&self, online: bool) {
        self.hub.online.store(online, Ordering::SeqCst);
    }

    /// Deliver a message to every link subscribed to a matching filter
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.hub.deliver(topic, &payload.into());
    }

    /// Sever every live link, as a broker crash would
    pub fn drop_links(&self, reason: &str) {
        let links = std::mem::take(&mut *self.hub.links.lock().unwrap());
        for link in links {
            let _ = link.tx.send(LinkEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Everything published through any link, in order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.hub.published.lock().unwrap().clone()
    }

    /// Published payloads on one topic, as strings
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.hub
            .published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    /// Number of currently live links
    pub fn live_links(&self) -> usize {
        self.hub.links.lock().unwrap().len()
    }

    /// Filters currently subscribed across live links
    pub fn active_filters(&self) -> Vec<String> {
        let links = self.hub.links.lock().unwrap();
        let mut filters: Vec<String> = links
            .iter()
            .flat_map(|l| l.filters.iter().cloned())
            .collect();
        filters.sort();
        filters.dedup();
        filters
    }
}

impl Hub {
    fn deliver(&self, topic: &str, payload: &[u8]) {
        let links = self.links.lock().unwrap();
        for link in links.iter() {
            if link.filters.iter().any(|f| topic_matches(f, topic)) {
                let _ = link.tx.send(LinkEvent::Message(InboundMessage::new(
                    topic,
                    payload.to_vec(),
                )));
            }
        }
    }

    fn remove_link(&self, id: u64) {
        self.links.lock().unwrap().retain(|l| l.id != id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(Arc<dyn TransportSink>, Box<dyn TransportEvents>)> {
        if !self.hub.online.load(Ordering::SeqCst) {
            return Err(ControlError::Connection("broker unreachable".into()));
        }

        let id = self.hub.next_link.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.links.lock().unwrap().push(Link {
            id,
            filters: HashSet::new(),
            tx,
        });

        Ok((
            Arc::new(MemorySink {
                hub: self.hub.clone(),
                id,
            }),
            Box::new(MemoryEvents { rx }),
        ))
    }
}

struct MemorySink {
    hub: Arc<Hub>,
    id: u64,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.hub
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));
        self.hub.deliver(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        let mut links = self.hub.links.lock().unwrap();
        let link = links
            .iter_mut()
            .find(|l| l.id == self.id)
            .ok_or_else(|| ControlError::Subscribe {
                filter: filter.to_string(),
                reason: "link is gone".into(),
            })?;
        link.filters.insert(filter.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        let mut links = self.hub.links.lock().unwrap();
        if let Some(link) = links.iter_mut().find(|l| l.id == self.id) {
            link.filters.remove(filter);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.hub.remove_link(self.id);
        Ok(())
    }
}

struct MemoryEvents {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
impl TransportEvents for MemoryEvents {
    async fn next(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }
}
