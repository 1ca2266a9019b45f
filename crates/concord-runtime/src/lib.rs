//! Concord Runtime - Node orchestration and service loop
//!
//! - [`config`]: JSON node configuration, validated into [`NodeSettings`]
//! - [`logging`]: tracing subscriber setup (text or JSON)
//! - [`node`]: sans-IO node composing broadcast and replica
//! - [`service`]: async loop binding a node to the TCP transport

pub mod config;
pub mod logging;
pub mod node;
pub mod service;

pub use config::*;
pub use logging::*;
pub use node::*;
pub use service::*;
