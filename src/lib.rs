//! # busline
//!
//! `busline` is a thin domain layer over a publish/subscribe transport. It adds
//! what the raw transport lacks:
//!
//! - declarative listener registration with validation and defaulting
//!   ([`bus::on`], [`bus::on_sync`])
//! - request/reply on top of one-way publishes: a message carrying a
//!   `ReplyTo` topic gets its handler's result published back there
//!
//! ## Core Modules
//!
//! - `bus`: messages, handlers, the emitter and listener registration.
//! - `transport`: the transport traits plus an in-memory and a WebSocket
//!   implementation.
//! - `config`: loading settings from files and environment variables.
//! - `utils`: error types and logging setup.
//!
//! ## Example
//!
//! ```rust,no_run
//! use busline::bus::{self, ListenerConfig, Message, handler_fn};
//! use busline::transport::MemoryTransport;
//! use busline::utils::BoxError;
//!
//! # async fn run() -> Result<(), busline::utils::BusError> {
//! let transport = MemoryTransport::new();
//! let config = ListenerConfig::new("requests", "workers").with_handler(handler_fn(
//!     |msg: Message<serde_json::Value>| async move { Ok::<_, BoxError>(msg.into_body()) },
//! ));
//! bus::on(&transport, config).await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod transport;
pub mod utils;
