// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dosing events emitted by a control algorithm's `execute`.
//!
//! Serializes with `{"type": "…", ...fields}` format.

use serde::{Deserialize, Serialize};

/// Outcome of one control tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// No pumps were actuated this tick.
    #[serde(rename = "no_event")]
    NoEvent { reason: String },

    /// Fresh media was exchanged against waste.
    #[serde(rename = "dilution")]
    Dilution { reason: String },

    /// Alternative media was dosed (possibly alongside fresh media).
    #[serde(rename = "alt_media")]
    AltMedia {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_ml: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt_media_ml: Option<f64>,
    },
}

impl Event {
    pub fn no_event(reason: impl Into<String>) -> Self {
        Event::NoEvent { reason: reason.into() }
    }

    pub fn dilution(reason: impl Into<String>) -> Self {
        Event::Dilution { reason: reason.into() }
    }

    pub fn alt_media(reason: impl Into<String>) -> Self {
        Event::AltMedia { reason: reason.into(), media_ml: None, alt_media_ml: None }
    }

    pub fn reason(&self) -> &str {
        match self {
            Event::NoEvent { reason }
            | Event::Dilution { reason }
            | Event::AltMedia { reason, .. } => reason,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::NoEvent { reason } => write!(f, "no event: {reason}"),
            Event::Dilution { reason } => write!(f, "dilution event: {reason}"),
            Event::AltMedia { reason, .. } => write!(f, "alt media event: {reason}"),
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
