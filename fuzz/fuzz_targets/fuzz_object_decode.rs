//! Fuzz target for loose object, tree and commit decoding.

#![no_main]

use libfuzzer_sys::fuzz_target;
use twig_storage::{decompress, unframe, Commit, Tree};

fuzz_target!(|data: &[u8]| {
    let _ = unframe(data);
    let _ = decompress(data);

    if let Ok(tree) = Tree::decode(data) {
        let _ = Tree::decode(&tree.encode());
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Commit::parse(text);
    }
});
