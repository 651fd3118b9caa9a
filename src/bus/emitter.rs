use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::bus::message::RequestEnvelope;
use crate::config::EmitterSettings;
use crate::transport::{Producer, Transport};
use crate::utils::error::BusError;

/// Publish-side connection settings, passed through to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
    /// Broker to publish to; `None` lets the transport pick its default.
    pub address: Option<String>,
    pub dial_timeout: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            address: None,
            dial_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&EmitterSettings> for EmitterConfig {
    fn from(settings: &EmitterSettings) -> Self {
        Self {
            address: settings.address.clone().filter(|a| !a.is_empty()),
            dial_timeout: Duration::from_millis(settings.dial_timeout_ms),
        }
    }
}

/// Publishes payloads to topics through a transport producer.
pub struct Emitter<P> {
    producer: P,
}

impl<P: Producer> Emitter<P> {
    /// Connects a producer on `transport`.
    pub async fn new<T>(transport: &T, config: EmitterConfig) -> Result<Self, BusError>
    where
        T: Transport<Producer = P>,
    {
        let producer = transport.new_producer(&config).await?;
        Ok(Self { producer })
    }

    pub fn from_producer(producer: P) -> Self {
        Self { producer }
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// JSON-encodes `payload` and publishes it to `topic`.
    pub async fn emit<S: Serialize>(&self, topic: &str, payload: &S) -> Result<(), BusError> {
        let body = serde_json::to_vec(payload).map_err(BusError::Encode)?;
        self.emit_raw(topic, body).await
    }

    /// Publishes `body` unchanged.
    pub async fn emit_raw(&self, topic: &str, body: Vec<u8>) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(BusError::TopicRequired);
        }

        self.producer.publish(topic, body).await?;
        debug!("Emitted to {topic}");
        Ok(())
    }

    /// Publishes `payload` to `topic` asking for the result on `reply_to`.
    ///
    /// `payload` must serialize to a JSON object since its fields share the
    /// envelope with `ReplyTo`.
    pub async fn request<S: Serialize>(
        &self,
        topic: &str,
        reply_to: &str,
        payload: &S,
    ) -> Result<(), BusError> {
        let body = serde_json::to_vec(&RequestEnvelope {
            reply_to,
            body: payload,
        })
        .map_err(BusError::Encode)?;
        self.emit_raw(topic, body).await
    }
}
