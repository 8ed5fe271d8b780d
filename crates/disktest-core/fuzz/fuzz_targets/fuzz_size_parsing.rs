//! Fuzz test for size string parsing
//!
//! Tests that size parsing handles arbitrary inputs safely.

#![no_main]

use libfuzzer_sys::fuzz_target;

use disktest_core::{format_size, parse_size};

fuzz_target!(|data: &str| {
    // Should never panic, only return Ok/Err
    if let Ok(size) = parse_size(data) {
        let _ = format_size(size);
    }

    for suffix in ["", "B", "K", "KB", "KiB", "M", "MB", "G", "GB", "T", "TB", "k", "m", "g"] {
        let input = format!("{}{}", data.trim(), suffix);
        let _ = parse_size(&input);
    }

    let _ = parse_size(&format!("  {}  ", data));
});
