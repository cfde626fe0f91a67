//! Fuzz target for delta application.
//!
//! The first byte picks how much of the input is the base; the rest is
//! the delta.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (base, delta) = rest.split_at(split);

    if let Ok(target) = twig_git::apply_delta(base, delta) {
        let parsed = twig_git::Delta::parse(delta).expect("applied delta must parse");
        assert_eq!(target.len(), parsed.target_len);
    }
});
