//! Fuzz target for `config.toml` parsing.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Any config that parses and validates must survive a serialize/parse
//! cycle unchanged and resolve a socket path without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shien_config::{AppConfig, DataDir};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = AppConfig::parse(text) else {
        return;
    };

    let rendered = toml::to_string(&config).expect("valid config must serialize");
    let reparsed = AppConfig::parse(&rendered).expect("serialized config must parse");
    assert_eq!(config, reparsed);

    let _ = config.socket_path(&DataDir::at("/var/empty/shien"));
});
