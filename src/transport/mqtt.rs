//! MQTT transport backed by rumqttc

use super::{LinkEvent, Transport, TransportEvents, TransportSink};
use crate::config::BrokerConfig;
use crate::error::{ControlError, Result};
use crate::types::InboundMessage;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as WireEvent, EventLoop, MqttOptions, Packet, QoS,
    TlsConfiguration, Transport as WireTransport,
};
use std::sync::Arc;
use std::time::Duration;

/// Outstanding-request capacity of the rumqttc client channel
const REQUEST_CAPACITY: usize = 64;

/// MQTT broker transport
///
/// Each `connect` builds a fresh session; reconnection policy lives in
/// the channel client, not here.
pub struct MqttTransport {
    config: BrokerConfig,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    async fn options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(
            self.config.client_id(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_credentials(self.config.username.clone(), self.config.password.clone());

        if self.config.use_tls {
            let ca_file = self.config.ca_file.as_ref().ok_or_else(|| {
                ControlError::Config("tls enabled but no ca certificate configured".into())
            })?;
            let ca = tokio::fs::read(ca_file).await?;
            options.set_transport(WireTransport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        Ok(options)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(Arc<dyn TransportSink>, Box<dyn TransportEvents>)> {
        let options = self.options().await?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        // Drive the event loop until the broker accepts the session, so
        // the link handed out is actually usable.
        let deadline = Duration::from_secs(self.config.connect_timeout_secs);
        let accepted = tokio::time::timeout(deadline, async {
            loop {
                match eventloop.poll().await {
                    Ok(WireEvent::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            return Ok(());
                        }
                        return Err(ControlError::Connection(format!(
                            "broker refused session: {:?}",
                            ack.code
                        )));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(ControlError::Connection(e.to_string())),
                }
            }
        })
        .await;

        match accepted {
            Ok(result) => result?,
            Err(_) => {
                return Err(ControlError::Connection(format!(
                    "broker did not answer within {}s",
                    self.config.connect_timeout_secs
                )))
            }
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            tls = self.config.use_tls,
            "Connected to broker"
        );

        Ok((
            Arc::new(MqttSink { client }),
            Box::new(MqttEvents {
                eventloop,
                closed: false,
            }),
        ))
    }
}

struct MqttSink {
    client: AsyncClient,
}

#[async_trait]
impl TransportSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| ControlError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| ControlError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| ControlError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| ControlError::Connection(e.to_string()))
    }
}

struct MqttEvents {
    eventloop: EventLoop,
    closed: bool,
}

#[async_trait]
impl TransportEvents for MqttEvents {
    async fn next(&mut self) -> Option<LinkEvent> {
        if self.closed {
            return None;
        }

        loop {
            match self.eventloop.poll().await {
                Ok(WireEvent::Incoming(Packet::Publish(publish))) => {
                    return Some(LinkEvent::Message(InboundMessage::new(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                    )));
                }
                Ok(WireEvent::Incoming(Packet::Disconnect)) => {
                    self.closed = true;
                    return Some(LinkEvent::Closed {
                        reason: "broker closed the session".into(),
                    });
                }
                Ok(_) => continue,
                Err(e) => {
                    self.closed = true;
                    return Some(LinkEvent::Closed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
