//! Fuzz target: UPID parsing.
#![no_main]

use fleet_core::TaskHandle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(upid) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(handle) = TaskHandle::parse(upid) {
        // A parsed handle renders back to the exact input.
        assert_eq!(handle.to_string(), upid);
    }
});
