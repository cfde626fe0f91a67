//! Fuzz target for pkt-line parsing.
//!
//! Tests that the pkt-line reader, ref advertisement parser and
//! upload-pack response demultiplexer handle arbitrary input without
//! panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = twig_git::PktLineReader::new(Cursor::new(data));

    // Bounded so crafted input cannot loop forever.
    for _ in 0..100 {
        match reader.read() {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => break,
        }
    }

    let _ = twig_git::RefAdvertisement::parse(data);
    let _ = twig_git::extract_pack(data);
});
