#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use concord_wire::WireMessage;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode to the same bytes
    if let Ok(message) = WireMessage::decode(Bytes::copy_from_slice(data)) {
        let encoded = message.encode();
        let again = WireMessage::decode(encoded).expect("re-encoded message decodes");
        assert_eq!(message, again);
    }
});
