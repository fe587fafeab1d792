//! Fuzz testing for the request classifiers.
//!
//! Every function here sees attacker-controlled header text, so none of them
//! may panic on any input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_request_parsing -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `classify`: origin classification against a host and both policy kinds
//! - `is_api_request`: API-vs-browser decision from path and headers
//! - `DeviceInfo::from_user_agent`: user-agent parsing

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use portal_guard::audit::DeviceInfo;
use portal_guard::middleware::{OriginPolicy, classify, is_api_request, is_private_host};

#[derive(Debug, Arbitrary)]
struct Input {
    origin: String,
    host: String,
    path: String,
    accept: Option<String>,
    content_type: Option<String>,
    user_agent: String,
}

fuzz_target!(|input: Input| {
    let defaults = OriginPolicy::new(None);
    let explicit = OriginPolicy::new(Some(vec![input.host.clone()]));

    let decision = classify(&input.origin, &input.host, &defaults);
    if decision.allowed {
        // An echoed origin is always the request origin
        if let Some(echoed) = decision.echoed_origin.as_deref() {
            assert_eq!(echoed, input.origin.trim());
        }
    }
    let _ = classify(&input.origin, &input.host, &explicit);
    let _ = is_private_host(&input.host);

    let _ = is_api_request(
        &input.path,
        input.accept.as_deref(),
        input.content_type.as_deref(),
        "/api/",
    );

    let _ = DeviceInfo::from_user_agent(&input.user_agent);
});
