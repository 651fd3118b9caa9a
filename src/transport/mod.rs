//! The `transport` module is the seam between the core and the pub/sub
//! system that actually moves bytes.
//!
//! The core only ever talks to the traits defined here: a [`Transport`] hands
//! out consumers bound to a topic/channel and producers that publish to a
//! topic. Two implementations ship with the crate:
//!
//! - [`memory::MemoryTransport`]: an in-process hub with topic/channel fan-out,
//!   competing consumers and requeue on failure.
//! - [`websocket::WebSocketTransport`]: a client for a popsub-style WebSocket
//!   pub/sub server.

pub mod memory;
pub mod message;
pub mod websocket;
pub(crate) mod workers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::bus::EmitterConfig;
use crate::utils::error::{BusError, TransportError};

pub use memory::MemoryTransport;
pub use websocket::WebSocketTransport;

/// One delivery as the transport sees it.
///
/// `attempts` counts deliveries of this message to its channel, so it is `1`
/// the first time a handler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub body: Vec<u8>,
    /// Milliseconds since UNIX epoch at which the message entered the transport.
    pub timestamp: i64,
    pub attempts: u16,
}

impl RawMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body,
            timestamp: Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }
}

/// Transport-level consumer settings, copied from the listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Deliveries after which a failing message is given up on.
    pub max_attempts: u16,
    /// Delay before a failed message is handed out again.
    pub requeue_delay: Duration,
    pub dial_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            requeue_delay: Duration::ZERO,
            dial_timeout: Duration::from_secs(1),
        }
    }
}

/// Low-level message callback. The returned outcome decides whether the
/// transport considers the message done or failed.
#[async_trait]
pub trait RawHandler: Send + Sync {
    async fn handle_raw(&self, message: &RawMessage) -> Result<(), BusError>;
}

#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    type Consumer: Consumer;
    type Producer: Producer;

    /// Builds a consumer for `topic`/`channel`. Nothing is delivered until a
    /// handler is attached and the consumer is connected.
    fn new_consumer(
        &self,
        topic: &str,
        channel: &str,
        settings: ConsumerSettings,
    ) -> Result<Self::Consumer, TransportError>;

    async fn new_producer(&self, config: &EmitterConfig) -> Result<Self::Producer, TransportError>;
}

#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Runs `concurrency` invocations of `handler` in parallel once connected.
    fn add_concurrent_handlers(&mut self, handler: Arc<dyn RawHandler>, concurrency: usize);

    /// Connects through discovery services that resolve the brokers hosting the topic.
    async fn connect_to_lookupds(&mut self, addrs: &[String]) -> Result<(), TransportError>;

    /// Connects straight to the given brokers.
    async fn connect_to_brokers(&mut self, addrs: &[String]) -> Result<(), TransportError>;

    /// Stops receiving and waits for in-flight handlers to finish.
    async fn stop(&mut self);
}

#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError>;
}
