#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use concord_crdt::{OrSet, Operation};

fuzz_target!(|data: &[u8]| {
    let Ok(op) = Operation::decode(&Bytes::copy_from_slice(data)) else {
        return;
    };

    let mut set = OrSet::new();
    set.apply(&op);
    match &op {
        Operation::Add { element, .. } => assert!(set.contains(element)),
        Operation::Remove { element, .. } => assert!(!set.contains(element)),
    }
});
