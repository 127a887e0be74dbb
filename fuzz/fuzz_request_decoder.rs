//! Fuzz target for the daemon's request decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_request_decoder
//!
//! Feeds arbitrary frame bodies through the same decode step the control
//! socket uses. Decoding must fail cleanly, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shien_core::ipc::{CommandRequest, CommandResponse, codec};

fuzz_target!(|data: &[u8]| {
    if let Ok(request) = codec::decode::<CommandRequest>(data) {
        let body = codec::encode(&request).expect("decoded request must encode");
        let again: CommandRequest = codec::decode(&body).expect("encoded request must decode");
        assert_eq!(request.name, again.name);
        assert_eq!(request.args, again.args);
    }

    // Responses enforce "error present iff status is error" while decoding.
    if let Ok(response) = codec::decode::<CommandResponse>(data) {
        assert_eq!(response.is_ok(), response.error_detail().is_none());
    }
});
