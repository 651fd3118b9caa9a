use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::emitter::EmitterConfig;
use crate::bus::handler::{Handler, HandlerAdapter};
use crate::config::Settings;
use crate::transport::{Consumer, ConsumerSettings, Transport};
use crate::utils::error::BusError;

/// Discovery address used when a listener names neither lookup nor broker
/// addresses.
pub const DEFAULT_LOOKUP_ADDRESS: &str = "localhost:4161";

/// A subscription request: which topic/channel to consume, where to connect
/// and what to run for each message.
#[derive(Clone)]
pub struct ListenerConfig<H> {
    pub topic: String,
    pub channel: String,
    /// Discovery addresses. Ignored when `nsqd` is non-empty.
    pub lookup: Vec<String>,
    /// Direct broker addresses.
    pub nsqd: Vec<String>,
    /// `0` means `1`.
    pub handler_concurrency: usize,
    pub handler: Option<H>,
    pub max_attempts: u16,
    pub requeue_delay: Duration,
    pub dial_timeout: Duration,
    /// Where replies are published.
    pub emitter: EmitterConfig,
}

impl<H> ListenerConfig<H> {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        let consumer = ConsumerSettings::default();
        Self {
            topic: topic.into(),
            channel: channel.into(),
            lookup: Vec::new(),
            nsqd: Vec::new(),
            handler_concurrency: 0,
            handler: None,
            max_attempts: consumer.max_attempts,
            requeue_delay: consumer.requeue_delay,
            dial_timeout: consumer.dial_timeout,
            emitter: EmitterConfig::default(),
        }
    }

    /// Builds a config (without handler) from the `listener` and `emitter`
    /// sections of loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let listener = &settings.listener;
        Self {
            topic: listener.topic.clone(),
            channel: listener.channel.clone(),
            lookup: listener.lookup.clone(),
            nsqd: listener.nsqd.clone(),
            handler_concurrency: listener.handler_concurrency,
            handler: None,
            max_attempts: listener.max_attempts,
            requeue_delay: Duration::from_millis(listener.requeue_delay_ms),
            dial_timeout: Duration::from_millis(listener.dial_timeout_ms),
            emitter: EmitterConfig::from(&settings.emitter),
        }
    }

    pub fn with_handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.handler_concurrency = concurrency;
        self
    }

    pub fn with_lookup(mut self, addrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.lookup = addrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_nsqd(mut self, addrs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.nsqd = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Checks topic, channel and handler, in that order.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.topic.is_empty() {
            return Err(BusError::TopicRequired);
        }
        if self.channel.is_empty() {
            return Err(BusError::ChannelRequired);
        }
        if self.handler.is_none() {
            return Err(BusError::HandlerRequired);
        }
        Ok(())
    }

    /// Fills in the default discovery address and concurrency.
    pub fn with_defaults(mut self) -> Self {
        if self.lookup.is_empty() {
            self.lookup = vec![DEFAULT_LOOKUP_ADDRESS.to_string()];
        }
        if self.handler_concurrency == 0 {
            self.handler_concurrency = 1;
        }
        self
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            max_attempts: self.max_attempts,
            requeue_delay: self.requeue_delay,
            dial_timeout: self.dial_timeout,
        }
    }
}

impl<H> Default for ListenerConfig<H> {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl<H> std::fmt::Debug for ListenerConfig<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .field("lookup", &self.lookup)
            .field("nsqd", &self.nsqd)
            .field("handler_concurrency", &self.handler_concurrency)
            .field("handler", &self.handler.as_ref().map(|_| "Handler"))
            .field("max_attempts", &self.max_attempts)
            .field("requeue_delay", &self.requeue_delay)
            .field("dial_timeout", &self.dial_timeout)
            .field("emitter", &self.emitter)
            .finish()
    }
}

/// A consumer built by [`on_sync`] together with the outcome of connecting it.
///
/// The consumer is handed back even when the connection failed so the caller
/// can inspect or stop it.
pub struct Registration<C> {
    pub consumer: C,
    pub connection: Result<(), BusError>,
}

impl<C> Registration<C> {
    pub fn is_connected(&self) -> bool {
        self.connection.is_ok()
    }
}

/// Registers a listener and leaves it running in the background.
///
/// Returns the validation, consumer construction or connection error, if any.
pub async fn on<T, H>(transport: &T, config: ListenerConfig<H>) -> Result<(), BusError>
where
    T: Transport,
    H: Handler,
{
    let Registration { consumer, connection } = on_sync(transport, config).await?;
    // dropping the handle detaches the consumer, it does not stop it
    drop(consumer);
    connection
}

/// Registers a listener and returns its consumer for the caller to manage.
///
/// Validation and consumer construction failures are returned as `Err`, before
/// any consumer exists. A connection failure is reported in the
/// [`Registration`] alongside the consumer.
pub async fn on_sync<T, H>(
    transport: &T,
    config: ListenerConfig<H>,
) -> Result<Registration<T::Consumer>, BusError>
where
    T: Transport,
    H: Handler,
{
    config.validate()?;
    let mut config = config.with_defaults();
    let Some(handler) = config.handler.take() else {
        return Err(BusError::HandlerRequired);
    };

    let mut consumer =
        transport.new_consumer(&config.topic, &config.channel, config.consumer_settings())?;

    let adapter = HandlerAdapter::new(handler, transport.clone(), config.emitter.clone());
    consumer.add_concurrent_handlers(Arc::new(adapter), config.handler_concurrency);

    let connection = if config.nsqd.is_empty() {
        consumer.connect_to_lookupds(&config.lookup).await
    } else {
        consumer.connect_to_brokers(&config.nsqd).await
    }
    .map_err(BusError::from);

    match &connection {
        Ok(()) => info!(
            "Listening on {}/{} with {} handler(s)",
            config.topic, config.channel, config.handler_concurrency
        ),
        Err(e) => warn!(
            "Listener {}/{} failed to connect: {e}",
            config.topic, config.channel
        ),
    }

    Ok(Registration {
        consumer,
        connection,
    })
}
