// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    init = { JobState::Init, "init" },
    ready = { JobState::Ready, "ready" },
    sleeping = { JobState::Sleeping, "sleeping" },
    disconnected = { JobState::Disconnected, "disconnected" },
    lost = { JobState::Lost, "lost" },
)]
fn display_and_parse_roundtrip(state: JobState, name: &str) {
    assert_eq!(state.to_string(), name);
    assert_eq!(name.parse::<JobState>().unwrap(), state);
}

#[test]
fn unknown_state_errors() {
    let err = "zombie".parse::<JobState>().unwrap_err();
    assert_eq!(err.to_string(), "saw zombie: not a valid state");
}

#[test]
fn lost_is_not_settable() {
    assert!(!JobState::Lost.is_settable());
    for state in [JobState::Init, JobState::Ready, JobState::Sleeping, JobState::Disconnected] {
        assert!(state.is_settable());
    }
}

#[test]
fn serde_uses_lowercase_names() {
    assert_eq!(serde_json::to_string(&JobState::Sleeping).unwrap(), "\"sleeping\"");
}
