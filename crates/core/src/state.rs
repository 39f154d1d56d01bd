// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle states.
//!
//! `init → ready ↔ sleeping → disconnected` is driven by the job itself;
//! `lost` is only ever published by the broker as a retained last-will when a
//! client disappears without a clean disconnect.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a background job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Init,
    Ready,
    Sleeping,
    Disconnected,
    Lost,
}

crate::simple_display! {
    JobState {
        Init => "init",
        Ready => "ready",
        Sleeping => "sleeping",
        Disconnected => "disconnected",
        Lost => "lost",
    }
}

impl JobState {
    /// All five lifecycle values, in DAG order.
    pub const ALL: [JobState; 5] =
        [JobState::Init, JobState::Ready, JobState::Sleeping, JobState::Disconnected, JobState::Lost];

    /// True for states a job may enter on its own. `Lost` is broker-originated.
    pub fn is_settable(self) -> bool {
        self != JobState::Lost
    }
}

impl std::str::FromStr for JobState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(JobState::Init),
            "ready" => Ok(JobState::Ready),
            "sleeping" => Ok(JobState::Sleeping),
            "disconnected" => Ok(JobState::Disconnected),
            "lost" => Ok(JobState::Lost),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Error for a state name outside the five lifecycle values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("saw {0}: not a valid state")]
pub struct UnknownState(pub String);

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
