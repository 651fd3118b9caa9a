use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bus::emitter::{Emitter, EmitterConfig};
use crate::bus::message::Message;
use crate::transport::{RawHandler, RawMessage, Transport};
use crate::utils::error::{BoxError, BusError};

/// User logic run for every delivered message.
///
/// `Body` is what the JSON envelope decodes into; `Reply` is published to the
/// message's `ReplyTo` topic when one is set.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Body: DeserializeOwned + Send + 'static;
    type Reply: Serialize + Send + Sync + 'static;

    async fn handle(&self, message: Message<Self::Body>) -> Result<Self::Reply, BoxError>;
}

/// A [`Handler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn<F, B, R> {
    f: F,
    _marker: PhantomData<fn(B) -> R>,
}

/// Lifts an async closure into a [`Handler`].
///
/// ```rust
/// # use busline::bus::{handler_fn, Message};
/// # use busline::utils::BoxError;
/// let echo = handler_fn(|msg: Message<serde_json::Value>| async move {
///     Ok::<_, BoxError>(msg.into_body())
/// });
/// # let _ = echo;
/// ```
pub fn handler_fn<F, Fut, B, R>(f: F) -> HandlerFn<F, B, R>
where
    F: Fn(Message<B>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

impl<F: Clone, B, R> Clone for HandlerFn<F, B, R> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, B, R> Handler for HandlerFn<F, B, R>
where
    F: Fn(Message<B>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    B: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
{
    type Body = B;
    type Reply = R;

    async fn handle(&self, message: Message<B>) -> Result<R, BoxError> {
        (self.f)(message).await
    }
}

/// Bridges a transport delivery to a [`Handler`].
///
/// Every invocation decodes the body, runs the handler and, when the message
/// carries a `ReplyTo`, publishes the handler's result there. The emitter for
/// replies is built on the first reply and shared by later ones; a failed
/// build is reported for that message and attempted again on the next.
pub(crate) struct HandlerAdapter<T: Transport, H> {
    handler: H,
    transport: T,
    emitter_config: EmitterConfig,
    emitter: OnceCell<Emitter<T::Producer>>,
}

impl<T: Transport, H: Handler> HandlerAdapter<T, H> {
    pub(crate) fn new(handler: H, transport: T, emitter_config: EmitterConfig) -> Self {
        Self {
            handler,
            transport,
            emitter_config,
            emitter: OnceCell::new(),
        }
    }

    async fn reply(&self, topic: &str, reply: &H::Reply) -> Result<(), BusError> {
        let emitter = self
            .emitter
            .get_or_try_init(|| Emitter::new(&self.transport, self.emitter_config.clone()))
            .await?;
        emitter.emit(topic, reply).await
    }
}

#[async_trait]
impl<T: Transport, H: Handler> RawHandler for HandlerAdapter<T, H> {
    async fn handle_raw(&self, raw: &RawMessage) -> Result<(), BusError> {
        let message = Message::<H::Body>::decode(raw.clone())?;
        let reply_to = message.reply_to.clone();

        let reply = self
            .handler
            .handle(message)
            .await
            .map_err(BusError::Handler)?;

        if reply_to.is_empty() {
            debug!("Handled {} without reply", raw.id);
            return Ok(());
        }

        self.reply(&reply_to, &reply).await?;
        debug!("Handled {} and replied to {reply_to}", raw.id);
        Ok(())
    }
}
