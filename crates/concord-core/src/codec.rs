//! Big-endian codec primitives
//!
//! Layout rules shared by every message:
//! - variable-length fields: 4-byte big-endian length, then raw bytes
//! - 128-bit identifiers: high 8 bytes, then low 8 bytes
//! - peers: 4 address bytes, then a 2-byte port
//! - version vectors: 4-byte count, then (peer, 4-byte counter) pairs
//!
//! Readers never panic on short or hostile input; every shortfall is a
//! `BufferTooShort` error.

use bytes::{Buf, BufMut, Bytes};

use crate::{AddTag, ConcordError, ConcordResult, MessageId, PeerId, VersionVector};

/// Size of one encoded version vector entry
const VV_ENTRY_LEN: usize = PeerId::ENCODED_LEN + 4;

#[inline]
fn ensure<B: Buf>(buf: &B, needed: usize) -> ConcordResult<()> {
    if buf.remaining() < needed {
        return Err(ConcordError::BufferTooShort {
            expected: needed,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u16<B: Buf>(buf: &mut B) -> ConcordResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32<B: Buf>(buf: &mut B) -> ConcordResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64<B: Buf>(buf: &mut B) -> ConcordResult<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn put_u128<B: BufMut>(buf: &mut B, value: u128) {
    buf.put_u64((value >> 64) as u64);
    buf.put_u64(value as u64);
}

pub fn get_u128<B: Buf>(buf: &mut B) -> ConcordResult<u128> {
    ensure(buf, 16)?;
    let hi = buf.get_u64();
    let lo = buf.get_u64();
    Ok(((hi as u128) << 64) | lo as u128)
}

pub fn put_message_id<B: BufMut>(buf: &mut B, id: MessageId) {
    put_u128(buf, id.0);
}

pub fn get_message_id<B: Buf>(buf: &mut B) -> ConcordResult<MessageId> {
    get_u128(buf).map(MessageId)
}

pub fn put_add_tag<B: BufMut>(buf: &mut B, tag: AddTag) {
    put_u128(buf, tag.0);
}

pub fn get_add_tag<B: Buf>(buf: &mut B) -> ConcordResult<AddTag> {
    get_u128(buf).map(AddTag)
}

/// Write a length-prefixed byte field
pub fn put_len_bytes<B: BufMut>(buf: &mut B, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Read a length-prefixed byte field
pub fn get_len_bytes<B: Buf>(buf: &mut B) -> ConcordResult<Bytes> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

pub fn put_string<B: BufMut>(buf: &mut B, value: &str) {
    put_len_bytes(buf, value.as_bytes());
}

/// Read a length-prefixed UTF-8 string
pub fn get_string<B: Buf>(buf: &mut B) -> ConcordResult<String> {
    let raw = get_len_bytes(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| ConcordError::InvalidWireFormat(format!("invalid utf-8: {}", e)))
}

pub fn put_peer<B: BufMut>(buf: &mut B, peer: PeerId) {
    buf.put_slice(&peer.to_bytes());
}

pub fn get_peer<B: Buf>(buf: &mut B) -> ConcordResult<PeerId> {
    ensure(buf, PeerId::ENCODED_LEN)?;
    let mut raw = [0u8; PeerId::ENCODED_LEN];
    buf.copy_to_slice(&mut raw);
    Ok(PeerId::from_bytes(raw))
}

pub fn put_version_vector<B: BufMut>(buf: &mut B, vv: &VersionVector) {
    let entries = vv.to_compact();
    buf.put_u32(entries.len() as u32);
    for (peer, clock) in entries {
        put_peer(buf, peer);
        buf.put_u32(clock);
    }
}

pub fn get_version_vector<B: Buf>(buf: &mut B) -> ConcordResult<VersionVector> {
    let count = get_u32(buf)? as usize;
    // Bound the allocation by what the buffer can actually hold
    let needed = count.checked_mul(VV_ENTRY_LEN).ok_or_else(|| {
        ConcordError::InvalidWireFormat(format!("version vector count {} overflows", count))
    })?;
    ensure(buf, needed)?;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let peer = get_peer(buf)?;
        let clock = get_u32(buf)?;
        entries.push((peer, clock));
    }
    Ok(VersionVector::from_compact(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    #[test]
    fn test_len_bytes_layout() {
        let mut buf = BytesMut::new();
        put_len_bytes(&mut buf, b"abc");
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);

        let mut read = buf.freeze();
        assert_eq!(&get_len_bytes(&mut read).unwrap()[..], b"abc");
        assert_eq!(read.remaining(), 0);
    }

    #[test]
    fn test_empty_field_is_zero_length() {
        let mut buf = BytesMut::new();
        put_len_bytes(&mut buf, &[]);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_u128_high_then_low() {
        let mut buf = BytesMut::new();
        put_message_id(&mut buf, MessageId::from_parts(1, 2));
        assert_eq!(&buf[..8], &1u64.to_be_bytes());
        assert_eq!(&buf[8..], &2u64.to_be_bytes());
    }

    #[test]
    fn test_truncated_length_field() {
        let mut read = Bytes::from_static(&[0, 0, 0, 9, 1, 2]);
        match get_len_bytes(&mut read) {
            Err(ConcordError::BufferTooShort { expected, actual }) => {
                assert_eq!(expected, 9);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_hostile_vv_count_does_not_allocate() {
        let mut read = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(get_version_vector(&mut read).is_err());
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut buf = BytesMut::new();
        put_len_bytes(&mut buf, &[0xFF, 0xFE]);
        assert!(matches!(
            get_string(&mut buf.freeze()),
            Err(ConcordError::InvalidWireFormat(_))
        ));
    }

    #[test]
    fn test_version_vector_encoding() {
        let vv: VersionVector = [(PeerId::localhost(2), 7), (PeerId::localhost(1), 3)]
            .into_iter()
            .collect();
        let mut buf = BytesMut::new();
        put_version_vector(&mut buf, &vv);
        assert_eq!(buf.len(), 4 + 2 * VV_ENTRY_LEN);
        assert_eq!(&buf[..4], &[0, 0, 0, 2]);

        let decoded = get_version_vector(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, vv);
    }

    proptest! {
        #[test]
        fn prop_readers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut read = Bytes::from(data);
            let _ = get_version_vector(&mut read.clone());
            let _ = get_string(&mut read.clone());
            let _ = get_peer(&mut read.clone());
            let _ = get_u128(&mut read);
        }
    }
}
