// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-table helpers for `pio kill`.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Send SIGTERM to the oldest process whose command line names `job`,
/// mirroring a `pkill -f -o`. Returns the pid, or `None` when nothing
/// matched.
pub fn kill_oldest_job(job: &str) -> Result<Option<u32>, std::io::Error> {
    let sys = sysinfo::System::new_all();
    let me = sysinfo::get_current_pid().ok();

    let oldest = sys
        .processes()
        .iter()
        .filter(|(pid, _)| Some(**pid) != me)
        .filter(|(_, process)| {
            process.cmd().iter().any(|arg| arg.to_string_lossy().contains(job))
        })
        .min_by_key(|(_, process)| process.start_time())
        .map(|(pid, _)| pid.as_u32());

    let Some(pid) = oldest else {
        return Ok(None);
    };

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| std::io::Error::other(format!("kill {pid}: {e}")))?;
    Ok(Some(pid))
}
