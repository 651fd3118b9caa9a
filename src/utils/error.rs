//! The `error` module defines the error types used within `busline`.
//!
//! `BusError` is what registration, emission and per-message handling report.
//! `TransportError` covers everything the transport layer can fail with and is
//! wrapped by `BusError::Transport` when it crosses into the core.

use thiserror::Error;

/// Error type returned by user handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic is mandatory")]
    TopicRequired,

    #[error("channel is mandatory")]
    ChannelRequired,

    #[error("handler is mandatory")]
    HandlerRequired,

    #[error("failed to decode message body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid topic or channel name: {0:?}")]
    InvalidName(String),

    #[error("no addresses to connect to")]
    NoAddresses,

    #[error("failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("timed out connecting to {addr}")]
    Timeout { addr: String },

    #[error("no handlers attached to consumer")]
    NoHandlers,

    #[error("consumer is already connected")]
    AlreadyConnected,

    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),

    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}
