//! The device-side CSV decoder must reject malformed payloads without
//! panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pushgate_proto::csv::decode_notification_csv;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_notification_csv(text);
    }
});
