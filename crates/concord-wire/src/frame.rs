//! Length-delimited framing for stream transports
//!
//! Frame = 4-byte big-endian length + one encoded `WireMessage`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use concord_core::{ConcordError, ConcordResult};

use crate::WireMessage;

/// Frame length prefix size
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum frame body size
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Encode a message into a complete frame
pub fn encode_frame(message: &WireMessage) -> ConcordResult<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u32(0);
    message.encode_into(&mut buf);

    let body_len = buf.len() - FRAME_HEADER_SIZE;
    if body_len > MAX_FRAME_SIZE {
        return Err(ConcordError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_SIZE,
        });
    }
    buf[..FRAME_HEADER_SIZE].copy_from_slice(&(body_len as u32).to_be_bytes());
    Ok(buf.freeze())
}

/// Incremental frame splitter over a growing receive buffer
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Receive buffer, for reading straight from a socket
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as frames
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Split off the next complete frame body, if one is buffered
    pub fn next_frame(&mut self) -> ConcordResult<Option<Bytes>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(ConcordError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buf.len() < FRAME_HEADER_SIZE + len {
            self.buf.reserve(FRAME_HEADER_SIZE + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}
