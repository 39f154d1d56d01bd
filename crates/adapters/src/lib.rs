// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-adapters: the pump hardware seam.
//!
//! Control code drives pumps only through [`PumpAdapter`]. The shipped
//! implementation, [`CalibratedPumps`], converts between millilitres and run
//! seconds with the per-pump coefficients from config, announces every run on
//! the `dosing_events` topic, and holds for the run duration. The actual
//! motor driver sits behind this trait and is not this crate's concern.

mod pumps;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use pumps::CalibratedPumps;

use async_trait::async_trait;
use pio_bus::BusError;
use thiserror::Error;

/// How much to pump: a volume (converted via calibration) or a raw run time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dose {
    Ml(f64),
    Seconds(f64),
}

impl Dose {
    pub fn amount(self) -> f64 {
        match self {
            Dose::Ml(v) | Dose::Seconds(v) => v,
        }
    }
}

/// The three pumps on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pump {
    Media,
    AltMedia,
    Waste,
}

impl Pump {
    /// Event name on the `dosing_events` topic.
    pub fn event_name(self) -> &'static str {
        match self {
            Pump::Media => "add_media",
            Pump::AltMedia => "add_alt_media",
            Pump::Waste => "remove_waste",
        }
    }
}

/// Contract for driving the unit's pumps. Each call completes the full pump
/// run (these are not cancellable mid-step) and returns the millilitres
/// moved.
#[async_trait]
pub trait PumpAdapter: Send + Sync {
    async fn add_media(&self, dose: Dose) -> Result<f64, PumpError>;
    async fn add_alt_media(&self, dose: Dose) -> Result<f64, PumpError>;
    async fn remove_waste(&self, dose: Dose) -> Result<f64, PumpError>;
}

/// Pump driver errors.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("negative dose: {0}")]
    NegativeDose(f64),

    #[error("pump calibration coefficient must be positive, got {0}")]
    BadCalibration(f64),

    #[error(transparent)]
    Bus(#[from] BusError),
}
