// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-cli: the `pio` worker binary and the `pios` leader binary.

pub mod confirm;
pub mod exit_error;
pub mod fleet;
pub mod jobs;
pub mod logfile;
pub mod procs;

pub use exit_error::ExitError;

/// This host's unit name (its hostname).
pub fn unit_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

/// Install the tracing subscriber for a binary. `-v` raises the filter to
/// debug, `-vv` to trace; `RUST_LOG` wins when set.
pub fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}
