//! Concord Core - Fundamental types shared by every layer
//!
//! This crate defines:
//! - Identifiers (PeerId, MessageId, AddTag)
//! - The version vector used for causal ordering
//! - Membership and delivery events exchanged between layers
//! - Big-endian codec primitives and the error taxonomy

pub mod codec;
pub mod error;
pub mod event;
pub mod id;
pub mod version;

pub use codec::*;
pub use error::*;
pub use event::*;
pub use id::*;
pub use version::*;
