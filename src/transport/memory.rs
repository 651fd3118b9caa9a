//! In-process transport.
//!
//! `MemoryTransport` is a cheap-to-clone handle on a shared hub that behaves
//! like a single-node broker:
//! - every channel of a topic receives its own copy of each message
//! - consumers on the same channel compete for messages (round robin)
//! - messages published to a topic without channels wait on the topic and are
//!   handed to the first channel that connects
//! - a failed delivery is requeued on its channel after `requeue_delay` until
//!   `max_attempts` deliveries have been made
//!
//! The hub only accepts connections to addresses it knows about, and keeps a
//! log of publishes and connection paths so callers can observe what happened.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::bus::{DEFAULT_LOOKUP_ADDRESS, EmitterConfig};
use crate::transport::workers::{FailureHook, WorkerPool};
use crate::transport::{
    Consumer, ConsumerSettings, Producer, RawHandler, RawMessage, Transport,
};
use crate::utils::error::TransportError;

/// Broker address `MemoryTransport::new` knows and producers default to.
pub const DEFAULT_BROKER_ADDRESS: &str = "localhost:4150";

type ConsumerId = u64;

/// Which connection strategy a consumer used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPath {
    Lookup(Vec<String>),
    Brokers(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub topic: String,
    pub channel: String,
    pub path: ConnectionPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
}

#[derive(Default)]
struct Hub {
    next_consumer: AtomicU64,
    brokers: Mutex<HashSet<String>>,
    lookupds: Mutex<HashSet<String>>,
    topics: Mutex<HashMap<String, TopicState>>,
    published: Mutex<Vec<Published>>,
    connections: Mutex<Vec<Connection>>,
}

#[derive(Default)]
struct TopicState {
    channels: HashMap<String, ChannelState>,
    backlog: VecDeque<RawMessage>,
}

#[derive(Default)]
struct ChannelState {
    subscribers: Vec<(ConsumerId, UnboundedSender<RawMessage>)>,
    backlog: VecDeque<RawMessage>,
    next: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Topic and channel names: 1 to 64 characters of `[.a-zA-Z0-9_-]`, with an
/// optional `#ephemeral` suffix.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let base = name.strip_suffix("#ephemeral").unwrap_or(name);
    !base.is_empty()
        && name.len() <= 64
        && base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

impl ChannelState {
    fn deliver(&mut self, mut message: RawMessage) {
        let attempts = message.attempts;

        while !self.subscribers.is_empty() {
            let idx = self.next % self.subscribers.len();
            self.next = self.next.wrapping_add(1);

            message.attempts = attempts.saturating_add(1);
            match self.subscribers[idx].1.send(message) {
                Ok(()) => return,
                Err(returned) => {
                    // consumer went away without detaching
                    self.subscribers.remove(idx);
                    message = returned.0;
                }
            }
        }

        message.attempts = attempts;
        self.backlog.push_back(message);
    }
}

impl Hub {
    fn route(&self, topic: &str, message: RawMessage) {
        let mut topics = lock(&self.topics);
        let state = topics.entry(topic.to_string()).or_default();

        if state.channels.is_empty() {
            debug!("Topic '{topic}' has no channels, holding {}", message.id);
            state.backlog.push_back(message);
            return;
        }

        for channel in state.channels.values_mut() {
            channel.deliver(message.clone());
        }
    }

    fn requeue(&self, topic: &str, channel: &str, message: RawMessage) {
        let mut topics = lock(&self.topics);
        if let Some(state) = topics
            .get_mut(topic)
            .and_then(|t| t.channels.get_mut(channel))
        {
            state.deliver(message);
        }
    }

    fn attach(&self, topic: &str, channel: &str, id: ConsumerId, sender: UnboundedSender<RawMessage>) {
        let mut topics = lock(&self.topics);
        let state = topics.entry(topic.to_string()).or_default();

        let held = if state.channels.is_empty() {
            std::mem::take(&mut state.backlog)
        } else {
            VecDeque::new()
        };

        let channel = state.channels.entry(channel.to_string()).or_default();
        channel.subscribers.push((id, sender));

        let pending: Vec<_> = channel.backlog.drain(..).chain(held).collect();
        for message in pending {
            channel.deliver(message);
        }
    }

    fn detach(&self, topic: &str, channel: &str, id: ConsumerId) {
        let mut topics = lock(&self.topics);
        if let Some(state) = topics
            .get_mut(topic)
            .and_then(|t| t.channels.get_mut(channel))
        {
            state.subscribers.retain(|(sub, _)| *sub != id);
        }
    }
}

impl MemoryTransport {
    /// A hub that knows `localhost:4150` as a broker and `localhost:4161` as a
    /// discovery service.
    pub fn new() -> Self {
        Self::without_defaults()
            .with_broker(DEFAULT_BROKER_ADDRESS)
            .with_lookupd(DEFAULT_LOOKUP_ADDRESS)
    }

    /// A hub that accepts no connections until addresses are added.
    pub fn without_defaults() -> Self {
        Self {
            hub: Arc::new(Hub::default()),
        }
    }

    pub fn with_broker(self, addr: impl Into<String>) -> Self {
        lock(&self.hub.brokers).insert(addr.into());
        self
    }

    pub fn with_lookupd(self, addr: impl Into<String>) -> Self {
        lock(&self.hub.lookupds).insert(addr.into());
        self
    }

    /// Publishes without going through a producer.
    pub fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError> {
        if !is_valid_name(topic) {
            return Err(TransportError::InvalidName(topic.to_string()));
        }

        lock(&self.hub.published).push(Published {
            topic: topic.to_string(),
            body: body.clone(),
        });
        self.hub.route(topic, RawMessage::new(body));
        Ok(())
    }

    /// Every publish so far, in order.
    pub fn published(&self) -> Vec<Published> {
        lock(&self.hub.published).clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        lock(&self.hub.published)
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Every successful consumer connection so far, in order.
    pub fn connections(&self) -> Vec<Connection> {
        lock(&self.hub.connections).clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("topics", &lock(&self.hub.topics).len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Consumer = MemoryConsumer;
    type Producer = MemoryProducer;

    fn new_consumer(
        &self,
        topic: &str,
        channel: &str,
        settings: ConsumerSettings,
    ) -> Result<MemoryConsumer, TransportError> {
        for name in [topic, channel] {
            if !is_valid_name(name) {
                return Err(TransportError::InvalidName(name.to_string()));
            }
        }

        Ok(MemoryConsumer {
            id: self.hub.next_consumer.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
            channel: channel.to_string(),
            settings,
            hub: self.hub.clone(),
            pool: None,
            connected: false,
        })
    }

    async fn new_producer(&self, config: &EmitterConfig) -> Result<MemoryProducer, TransportError> {
        let address = config
            .address
            .clone()
            .unwrap_or_else(|| DEFAULT_BROKER_ADDRESS.to_string());

        if !lock(&self.hub.brokers).contains(&address) {
            return Err(TransportError::Connect {
                addr: address,
                reason: "unknown broker".to_string(),
            });
        }

        Ok(MemoryProducer {
            transport: self.clone(),
            address,
        })
    }
}

pub struct MemoryConsumer {
    id: ConsumerId,
    topic: String,
    channel: String,
    settings: ConsumerSettings,
    hub: Arc<Hub>,
    pool: Option<WorkerPool>,
    connected: bool,
}

impl MemoryConsumer {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn failure_hook(&self) -> FailureHook {
        let hub = self.hub.clone();
        let topic = self.topic.clone();
        let channel = self.channel.clone();
        let max_attempts = self.settings.max_attempts;
        let delay = self.settings.requeue_delay;

        Arc::new(move |message, err| {
            if message.attempts >= max_attempts {
                warn!(
                    "Giving up on {} ({topic}/{channel}) after {} attempts: {err}",
                    message.id, message.attempts
                );
                return;
            }

            warn!("Requeueing {} ({topic}/{channel}): {err}", message.id);
            if delay.is_zero() {
                hub.requeue(&topic, &channel, message);
            } else {
                let hub = hub.clone();
                let topic = topic.clone();
                let channel = channel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    hub.requeue(&topic, &channel, message);
                });
            }
        })
    }

    fn connect(
        &mut self,
        addrs: &[String],
        known: &Mutex<HashSet<String>>,
        path: ConnectionPath,
    ) -> Result<(), TransportError> {
        if addrs.is_empty() {
            return Err(TransportError::NoAddresses);
        }
        if self.connected {
            return Err(TransportError::AlreadyConnected);
        }
        let sender = self
            .pool
            .as_ref()
            .ok_or(TransportError::NoHandlers)?
            .sender()
            .ok_or(TransportError::Closed)?;

        {
            let known = lock(known);
            if let Some(addr) = addrs.iter().find(|a| !known.contains(*a)) {
                return Err(TransportError::Connect {
                    addr: addr.clone(),
                    reason: "no such address".to_string(),
                });
            }
        }

        lock(&self.hub.connections).push(Connection {
            topic: self.topic.clone(),
            channel: self.channel.clone(),
            path,
        });
        self.hub.attach(&self.topic, &self.channel, self.id, sender);
        self.connected = true;

        info!("Consumer {}/{} connected", self.topic, self.channel);
        Ok(())
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    fn add_concurrent_handlers(&mut self, handler: Arc<dyn RawHandler>, concurrency: usize) {
        let label = format!("{}/{}", self.topic, self.channel);
        self.pool = Some(WorkerPool::spawn(
            label,
            handler,
            concurrency,
            self.failure_hook(),
        ));
    }

    async fn connect_to_lookupds(&mut self, addrs: &[String]) -> Result<(), TransportError> {
        let hub = self.hub.clone();
        self.connect(addrs, &hub.lookupds, ConnectionPath::Lookup(addrs.to_vec()))
    }

    async fn connect_to_brokers(&mut self, addrs: &[String]) -> Result<(), TransportError> {
        let hub = self.hub.clone();
        self.connect(addrs, &hub.brokers, ConnectionPath::Brokers(addrs.to_vec()))
    }

    async fn stop(&mut self) {
        self.hub.detach(&self.topic, &self.channel, self.id);
        self.connected = false;
        if let Some(pool) = self.pool.as_mut() {
            pool.shutdown().await;
        }
        info!("Consumer {}/{} stopped", self.topic, self.channel);
    }
}

#[derive(Clone)]
pub struct MemoryProducer {
    transport: MemoryTransport,
    address: String,
}

impl MemoryProducer {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError> {
        self.transport.publish(topic, body)
    }
}
