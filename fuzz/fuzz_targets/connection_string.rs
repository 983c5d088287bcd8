//! Fuzz the connection string parser.
//!
//! Any input must either parse or return a configuration error, and a
//! parsed configuration always has at least one host.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlconn_client::{Config, Error};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    match Config::from_connection_string(input) {
        Ok(config) => {
            assert!(!config.hosts.is_empty());
            let _ = format!("{config:?}");
        }
        Err(Error::Config(_)) => {}
        Err(e) => panic!("unexpected error kind: {e}"),
    }
});
