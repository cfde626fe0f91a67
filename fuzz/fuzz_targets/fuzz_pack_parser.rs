//! Fuzz target for pack decoding.
//!
//! Tests that the pack decoder handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use twig_git::{DecodeOptions, PackDecoder};
use twig_storage::ObjectStore;

fuzz_target!(|data: &[u8]| {
    // Skip the trailer check so mutated entries reach the entry parser.
    let options = DecodeOptions {
        verify_checksum: false,
        allow_thin: false,
    };
    let decoder = PackDecoder::new(data).options(options);
    let _ = decoder.entries();

    let Ok(dir) = tempfile::TempDir::new() else {
        return;
    };
    let store = ObjectStore::new(dir.path());
    let _ = decoder.decode(&store);
});
