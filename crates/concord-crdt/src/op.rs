//! Set operations and their broadcast encoding
//!
//! Layout: `len | type ("add" / "remove") | len | element | count | tags`,
//! each tag as two big-endian 64-bit halves.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use concord_core::codec::{get_add_tag, get_string, get_u32, put_add_tag, put_string};
use concord_core::{AddTag, ConcordError};

const ADD: &str = "add";
const REMOVE: &str = "remove";

/// Encoded tag size
const TAG_LEN: usize = 16;

/// Why an operation payload could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed operation: {0}")]
    Malformed(#[from] ConcordError),

    #[error("unknown operation type {0:?}")]
    UnknownType(String),

    #[error("add must carry exactly one tag, found {0}")]
    AddTagCount(usize),

    #[error("{0} trailing bytes after operation")]
    TrailingBytes(usize),
}

/// One replicated set mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Add { tag: AddTag, element: String },
    /// Removes exactly the tags observed by the issuer
    Remove { tags: BTreeSet<AddTag>, element: String },
}

impl Operation {
    pub fn element(&self) -> &str {
        match self {
            Operation::Add { element, .. } | Operation::Remove { element, .. } => element,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Operation::Add { tag, element } => {
                put_string(&mut buf, ADD);
                put_string(&mut buf, element);
                buf.put_u32(1);
                put_add_tag(&mut buf, *tag);
            }
            Operation::Remove { tags, element } => {
                put_string(&mut buf, REMOVE);
                put_string(&mut buf, element);
                buf.put_u32(tags.len() as u32);
                for tag in tags {
                    put_add_tag(&mut buf, *tag);
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(bytes: &Bytes) -> Result<Operation, DecodeError> {
        let mut buf = bytes.clone();
        let kind = get_string(&mut buf)?;
        let element = get_string(&mut buf)?;
        let count = get_u32(&mut buf)? as usize;

        let needed = count.saturating_mul(TAG_LEN);
        if buf.remaining() < needed {
            return Err(ConcordError::BufferTooShort {
                expected: needed,
                actual: buf.remaining(),
            }
            .into());
        }

        let op = match kind.as_str() {
            ADD => {
                if count != 1 {
                    return Err(DecodeError::AddTagCount(count));
                }
                Operation::Add {
                    tag: get_add_tag(&mut buf)?,
                    element,
                }
            }
            REMOVE => {
                let mut tags = BTreeSet::new();
                for _ in 0..count {
                    tags.insert(get_add_tag(&mut buf)?);
                }
                Operation::Remove { tags, element }
            }
            _ => return Err(DecodeError::UnknownType(kind)),
        };

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }
        Ok(op)
    }
}
