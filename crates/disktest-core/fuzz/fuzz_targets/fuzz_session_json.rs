//! Fuzz test for session file parsing
//!
//! Tests that session deserialization and validation handle arbitrary JSON
//! safely.

#![no_main]

use libfuzzer_sys::fuzz_target;

use disktest_core::SessionState;

fuzz_target!(|data: &str| {
    let result: Result<SessionState, _> = serde_json::from_str(data);

    if let Ok(session) = result {
        // Anything that parses must validate, report and round-trip without panicking
        if session.validate().is_ok() {
            let _ = session.info();
            let _ = session.progress_fraction();
            let _ = session.first_pending_pattern();
        }
        let _ = serde_json::to_string_pretty(&session);
    }

    let _: Result<SessionState, _> = serde_json::from_slice(data.as_bytes());
});
