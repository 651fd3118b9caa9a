//! The `bus` module is the domain layer on top of a [`Transport`]:
//! declarative listener registration and request/reply correlation.
//!
//! - `message`: the decoded [`Message`] handed to handlers, and the `ReplyTo`
//!   envelope.
//! - `handler`: the [`Handler`] contract and the adapter that turns a raw
//!   delivery into decode → handle → optional reply.
//! - `emitter`: publishes payloads to a topic.
//! - `listener`: validates a [`ListenerConfig`], applies defaults and wires a
//!   consumer ([`on`] / [`on_sync`]).
//!
//! [`Transport`]: crate::transport::Transport

pub mod emitter;
pub mod handler;
pub mod listener;
pub mod message;

pub use emitter::{Emitter, EmitterConfig};
pub use handler::{Handler, HandlerFn, handler_fn};
pub use listener::{DEFAULT_LOOKUP_ADDRESS, ListenerConfig, Registration, on, on_sync};
pub use message::Message;

#[cfg(test)]
mod tests;
