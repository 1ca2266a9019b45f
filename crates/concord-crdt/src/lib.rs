//! Concord CRDT - Observed-Remove Set
//!
//! Each add of an element mints a unique tag; a remove deletes exactly the
//! tags its issuer had observed. A concurrent add carries a tag the remove
//! never named, so it survives: add wins. No tombstones are kept.

pub mod op;
pub mod orset;
pub mod replica;

pub use op::*;
pub use orset::*;
pub use replica::*;
