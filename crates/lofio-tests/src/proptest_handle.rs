//! Property-based tests for the handle core.

use proptest::prelude::*;

use lofio_handle::{Behaviour, Caching};

/// Generates every caching mode.
pub fn arb_caching() -> impl Strategy<Value = Caching> {
    prop_oneof![
        Just(Caching::Unchanged),
        Just(Caching::None),
        Just(Caching::OnlyMetadata),
        Just(Caching::Reads),
        Just(Caching::ReadsAndMetadata),
        Just(Caching::All),
        Just(Caching::SafetyFsyncs),
        Just(Caching::Temporary),
    ]
}

/// Generates a single behaviour bit.
pub fn arb_behaviour_bit() -> impl Strategy<Value = Behaviour> {
    prop_oneof![
        Just(Behaviour::READABLE),
        Just(Behaviour::WRITABLE),
        Just(Behaviour::APPEND_ONLY),
        Just(Behaviour::NONBLOCKING),
        Just(Behaviour::SEEKABLE),
        Just(Behaviour::ALIGNED_IO),
        Just(Behaviour::FILE),
        Just(Behaviour::DIRECTORY),
        Just(Behaviour::SYMLINK),
        Just(Behaviour::PIPE),
        Just(Behaviour::SOCKET),
        Just(Behaviour::MULTIPLEXER),
        Just(Behaviour::PATH),
        Just(Behaviour::SAFETY_FSYNCS),
        Just(Behaviour::CACHE_METADATA),
        Just(Behaviour::CACHE_READS),
        Just(Behaviour::CACHE_WRITES),
        Just(Behaviour::CACHE_TEMPORARY),
    ]
}

/// Generates a union of behaviour bits.
pub fn arb_behaviour(max_bits: usize) -> impl Strategy<Value = Behaviour> {
    prop::collection::vec(arb_behaviour_bit(), 0..max_bits).prop_map(|bits| {
        bits.into_iter()
            .fold(Behaviour::NONE, |acc, bit| acc | bit)
    })
}
