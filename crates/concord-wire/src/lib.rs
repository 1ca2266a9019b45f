//! Concord Wire Protocol - Binary message format
//!
//! Every message starts with a 2-byte big-endian type tag:
//! - 202 / 204: membership handshake (hello, challenge reply)
//! - 302: causal broadcast
//! - 303 / 304 / 305: Byzantine broadcast, echo and ready
//!
//! Signed messages append a length-prefixed signature over the body bytes.
//! On a byte stream each message travels inside a length-delimited frame.

pub mod frame;
pub mod message;

pub use frame::*;
pub use message::*;
