// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive confirmation for fleet-wide commands.

use std::io::Write;

/// Prompt for a `Y` unless `-y` was passed. Anything but a literal `Y`
/// aborts.
pub fn confirm(prompt: &str, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }
    print!("{prompt} Y/n: ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim() == "Y"
}
