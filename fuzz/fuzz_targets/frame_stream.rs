#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use concord_wire::FrameDecoder;

#[derive(Arbitrary, Debug)]
struct Input {
    stream: Vec<u8>,
    /// Sizes of the reads the stream is split into
    chunks: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let mut decoder = FrameDecoder::new();
    let mut rest = &input.stream[..];

    for &size in input.chunks.iter().chain(std::iter::once(&u8::MAX)) {
        let take = (size as usize).min(rest.len());
        decoder.extend(&rest[..take]);
        rest = &rest[take..];

        loop {
            match decoder.next_frame() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                // Oversized length prefix; the connection would be dropped
                Err(_) => return,
            }
        }
        if rest.is_empty() {
            break;
        }
    }
});
