//! The `utils` module provides the pieces shared by every other module:
//! the crate's error types and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{BoxError, BusError, TransportError};
