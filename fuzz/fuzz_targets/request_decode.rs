//! Arbitrary bytes must never panic the request decoder, and anything it
//! accepts must re-encode to a document that decodes to the same request.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pushgate_proto::Request;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = Request::decode(data) else {
        return;
    };
    let Ok(encoded) = request.encode() else {
        return;
    };
    let decoded = Request::decode(&encoded).expect("re-encoded request must decode");
    assert_eq!(decoded, request);
});
