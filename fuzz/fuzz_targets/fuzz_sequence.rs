//! Fuzz target for stream entry id parsing.
//!
//! Parsing never panics, and anything accepted prints back to a string
//! that parses to the same sequence.

#![no_main]

use catalog_replication::Sequence;
use libfuzzer_sys::fuzz_target;
use std::cmp::Ordering;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    let (Ok(sa), Ok(sb)) = (Sequence::parse(a), Sequence::parse(b)) else {
        return;
    };

    assert_eq!(Sequence::parse(&sa.to_string()).ok(), Some(sa));
    assert_eq!(Sequence::parse(&sb.to_string()).ok(), Some(sb));

    // Antisymmetry
    match sa.cmp(&sb) {
        Ordering::Less => assert_eq!(sb.cmp(&sa), Ordering::Greater),
        Ordering::Greater => assert_eq!(sb.cmp(&sa), Ordering::Less),
        Ordering::Equal => assert_eq!(sa, sb),
    }
});
