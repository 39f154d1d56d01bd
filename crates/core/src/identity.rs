// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host identity: which unit this is and which experiment it participates in.
//!
//! Both values are explicit construction parameters threaded to every job -
//! never process-wide globals.

use serde::{Deserialize, Serialize};

/// Sentinel unit name addressing every node in the fleet.
pub const BROADCAST: &str = "$broadcast";

/// A unit (host) name paired with the experiment it is running.
///
/// Together they form the topic prefix `pioreactor/<unit>/<experiment>/…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub unit: String,
    pub experiment: String,
}

impl Ident {
    pub fn new(unit: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self { unit: unit.into(), experiment: experiment.into() }
    }

    /// True when this identity addresses the whole fleet rather than one host.
    pub fn is_broadcast(&self) -> bool {
        self.unit == BROADCAST
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.unit, self.experiment)
    }
}
