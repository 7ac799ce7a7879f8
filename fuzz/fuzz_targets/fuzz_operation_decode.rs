//! Fuzz target for operation payload decoding.
//!
//! Arbitrary payloads either fail to decode or decode to an operation that
//! survives an encode/decode cycle and applies to a cache without panicking.

#![no_main]

use catalog_replication::{MemStore, Operation, OperationMethod};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(operation) = Operation::from_json(data) else {
        return;
    };

    let encoded = operation.to_json().expect("decoded operation must encode");
    let again = Operation::from_json(encoded.as_bytes()).expect("encoded operation must decode");
    assert_eq!(again.method, operation.method);
    assert_eq!(again.record_id(), operation.record_id());

    let cache = MemStore::new();
    if let Some(catalog) = operation.catalog {
        match operation.method {
            OperationMethod::Upsert => cache.upsert(catalog),
            OperationMethod::Delete => {
                cache.remove(&catalog.id);
            }
        }
    }
});
