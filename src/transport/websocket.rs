//! WebSocket transport
//!
//! Client side of a popsub-style WebSocket pub/sub server:
//! - a consumer opens one connection per broker address, subscribes to its
//!   topic and feeds matching frames to the worker pool
//! - a producer holds a single connection and sends `publish` frames
//!
//! The server has no discovery service, no channels and no acknowledgments.
//! Lookup connections are refused, the channel only names the consumer in
//! logs, and a failed delivery is logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::bus::EmitterConfig;
use crate::transport::message::{ClientFrame, ServerFrame};
use crate::transport::workers::{FailureHook, WorkerPool};
use crate::transport::{
    Consumer, ConsumerSettings, Producer, RawHandler, RawMessage, Transport,
};
use crate::utils::error::TransportError;

/// Address producers use when the emitter configuration names none.
pub const DEFAULT_SERVER_ADDRESS: &str = "ws://127.0.0.1:8080";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Accepts both `host:port` and full `ws://`/`wss://` URLs.
pub(crate) fn endpoint(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("ws://{addr}")
    }
}

async fn dial(addr: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(timeout, connect_async(endpoint(addr))).await {
        Err(_) => Err(TransportError::Timeout {
            addr: addr.to_string(),
        }),
        Ok(Err(e)) => Err(TransportError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
        Ok(Ok((ws, _response))) => Ok(ws),
    }
}

fn text_frame(frame: &ClientFrame) -> Result<WsMessage, TransportError> {
    let text = serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(WsMessage::text(text))
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Consumer = WebSocketConsumer;
    type Producer = WebSocketProducer;

    fn new_consumer(
        &self,
        topic: &str,
        channel: &str,
        settings: ConsumerSettings,
    ) -> Result<WebSocketConsumer, TransportError> {
        Ok(WebSocketConsumer {
            topic: topic.to_string(),
            channel: channel.to_string(),
            settings,
            pool: None,
            readers: Vec::new(),
        })
    }

    async fn new_producer(&self, config: &EmitterConfig) -> Result<WebSocketProducer, TransportError> {
        let address = config
            .address
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVER_ADDRESS.to_string());
        let stream = dial(&address, config.dial_timeout).await?;

        debug!("Producer connected to {address}");
        Ok(WebSocketProducer {
            stream: Mutex::new(stream),
            address,
        })
    }
}

pub struct WebSocketConsumer {
    topic: String,
    channel: String,
    settings: ConsumerSettings,
    pool: Option<WorkerPool>,
    readers: Vec<Reader>,
}

/// One broker connection feeding the worker pool.
struct Reader {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn stop_readers(readers: Vec<Reader>) {
    for reader in readers {
        // the reader may already be gone if the server hung up
        let _ = reader.stop.send(());
        let _ = reader.task.await;
    }
}

impl WebSocketConsumer {
    pub fn is_connected(&self) -> bool {
        !self.readers.is_empty()
    }

    /// Dials `addr`, subscribes and spawns the task feeding `tx`.
    ///
    /// The task runs until the server hangs up or `Reader::stop` fires. Dropping
    /// the `Reader` without firing only detaches the task.
    async fn open_reader(
        &self,
        addr: &str,
        tx: mpsc::UnboundedSender<RawMessage>,
    ) -> Result<Reader, TransportError> {
        let mut ws = dial(addr, self.settings.dial_timeout).await?;
        ws.send(text_frame(&ClientFrame::Subscribe {
            topic: self.topic.clone(),
        })?)
        .await?;

        let unsubscribe = text_frame(&ClientFrame::Unsubscribe {
            topic: self.topic.clone(),
        })?;
        let (stop, mut stopped) = oneshot::channel::<()>();
        let topic = self.topic.clone();
        let peer = addr.to_string();

        let task = tokio::spawn(async move {
            let mut detached = false;
            loop {
                let frame = tokio::select! {
                    signal = &mut stopped, if !detached => {
                        if signal.is_err() {
                            // handle dropped, keep listening
                            detached = true;
                            continue;
                        }
                        let _ = ws.send(unsubscribe).await;
                        let _ = ws.close(None).await;
                        break;
                    }
                    frame = ws.next() => frame,
                };

                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Connection to {peer} failed: {e}");
                        break;
                    }
                };

                let frame = match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("Invalid server frame from {peer}: {err}");
                        continue;
                    }
                };
                if frame.topic != topic {
                    continue;
                }

                let mut message = RawMessage::new(frame.payload.into_bytes());
                message.timestamp = frame.timestamp;
                message.attempts = 1;
                if tx.send(message).is_err() {
                    break;
                }
            }
            debug!("Reader for {peer} closed");
        });

        Ok(Reader { stop, task })
    }

    fn failure_hook(&self) -> FailureHook {
        let label = format!("{}/{}", self.topic, self.channel);
        Arc::new(move |message, err| {
            warn!("Dropping {} ({label}), server has no requeue: {err}", message.id);
        })
    }
}

#[async_trait]
impl Consumer for WebSocketConsumer {
    fn add_concurrent_handlers(&mut self, handler: Arc<dyn RawHandler>, concurrency: usize) {
        let label = format!("{}/{}", self.topic, self.channel);
        self.pool = Some(WorkerPool::spawn(
            label,
            handler,
            concurrency,
            self.failure_hook(),
        ));
    }

    async fn connect_to_lookupds(&mut self, _addrs: &[String]) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("lookup discovery"))
    }

    async fn connect_to_brokers(&mut self, addrs: &[String]) -> Result<(), TransportError> {
        if addrs.is_empty() {
            return Err(TransportError::NoAddresses);
        }
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }
        let tx = self
            .pool
            .as_ref()
            .ok_or(TransportError::NoHandlers)?
            .sender()
            .ok_or(TransportError::Closed)?;

        let mut opened = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match self.open_reader(addr, tx.clone()).await {
                Ok(reader) => opened.push(reader),
                Err(e) => {
                    // all or nothing: undo the connections made so far
                    stop_readers(opened).await;
                    return Err(e);
                }
            }
            info!("Consumer {}/{} connected to {}", self.topic, self.channel, endpoint(addr));
        }

        self.readers = opened;
        Ok(())
    }

    async fn stop(&mut self) {
        stop_readers(std::mem::take(&mut self.readers)).await;
        if let Some(pool) = self.pool.as_mut() {
            pool.shutdown().await;
        }
        info!("Consumer {}/{} stopped", self.topic, self.channel);
    }
}

pub struct WebSocketProducer {
    stream: Mutex<WsStream>,
    address: String,
}

impl WebSocketProducer {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Producer for WebSocketProducer {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let payload = String::from_utf8(body)
            .map_err(|_| TransportError::Protocol("payload is not valid UTF-8".to_string()))?;
        let frame = text_frame(&ClientFrame::Publish {
            topic: topic.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        })?;

        self.stream.lock().await.send(frame).await?;
        Ok(())
    }
}
