// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shared job log file and `pio logs`.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

/// Detached jobs append here; `pio logs` follows it.
pub fn log_path() -> PathBuf {
    std::env::var("PIOREACTOR_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/log/pioreactor.log"))
}

/// Follow the shared log file until interrupted, printing appended lines.
pub async fn follow() -> Result<(), std::io::Error> {
    let path = log_path();
    let mut file = std::fs::File::open(&path)?;
    let mut offset = file.seek(SeekFrom::End(0))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        let len = file.metadata()?.len();
        if len < offset {
            // Rotated or truncated: start over from the top.
            offset = 0;
        }
        if len > offset {
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = String::new();
            file.read_to_string(&mut chunk)?;
            offset = file.stream_position()?;
            print!("{chunk}");
        }
    }
}
