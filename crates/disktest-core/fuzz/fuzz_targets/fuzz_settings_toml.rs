//! Fuzz test for settings TOML parsing
//!
//! Tests that settings deserialization handles arbitrary TOML safely.

#![no_main]

use libfuzzer_sys::fuzz_target;

use disktest_core::Settings;

fuzz_target!(|data: &str| {
    if let Ok(settings) = Settings::from_toml(data) {
        let _ = toml::to_string_pretty(&settings);

        // Stored strings are parsed lazily; bad values must surface as errors
        let _ = settings.test.file_size_bytes();
        let _ = settings.test.chunk_size_bytes();
        let _ = settings.test.pattern_list();
    }

    for table in ["test", "logging", "behavior"] {
        let wrapped = format!("[{}]\n{}", table, data);
        let _ = Settings::from_toml(&wrapped);
    }
});
