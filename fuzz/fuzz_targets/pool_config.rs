//! Fuzz pool size validation.
//!
//! Accepted sizes must satisfy the pool's invariants for its kind.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sqlconn_pool::{PoolConfig, PoolKind};

#[derive(Debug, Arbitrary)]
struct Input {
    null: bool,
    min_size: u16,
    max_size: Option<u16>,
}

fuzz_target!(|input: Input| {
    let config = if input.null {
        PoolConfig::null()
    } else {
        PoolConfig::new()
    };
    let min = usize::from(input.min_size);
    let max = input.max_size.map(usize::from);

    if let Ok((min, max)) = config.check_size(min, max) {
        match config.kind {
            PoolKind::Standard => {
                let max = max.expect("standard pools are bounded");
                assert!(max >= 1);
                assert!(max >= min);
            }
            PoolKind::Null => {
                assert_eq!(min, 0);
                assert!(max.is_none_or(|max| max > 0));
            }
        }
    }
});
