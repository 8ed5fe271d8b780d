//! Fuzz test for pattern selection parsing

#![no_main]

use libfuzzer_sys::fuzz_target;

use disktest_core::parse_pattern_list;

fuzz_target!(|data: &str| {
    if let Ok(patterns) = parse_pattern_list(data) {
        assert!(!patterns.is_empty(), "an accepted list selects something");
        assert!(
            patterns.windows(2).all(|w| w[0] < w[1]),
            "accepted lists come back in canonical order without duplicates"
        );
    }
});
