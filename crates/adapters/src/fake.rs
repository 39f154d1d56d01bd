// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording pump fake for tests: no sleeping, no bus traffic.

use crate::{Dose, Pump, PumpAdapter, PumpError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded pump invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpCall {
    pub pump: Pump,
    pub dose: Dose,
}

/// Test double that records every call. Volume conversion uses a 1:1
/// ml-per-second rate.
#[derive(Debug, Clone, Default)]
pub struct FakePumps {
    calls: Arc<Mutex<Vec<PumpCall>>>,
}

impl FakePumps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PumpCall> {
        self.calls.lock().clone()
    }

    /// Millilitre doses sent to one pump, in call order.
    pub fn ml_doses(&self, pump: Pump) -> Vec<f64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.pump == pump)
            .filter_map(|c| match c.dose {
                Dose::Ml(ml) => Some(ml),
                Dose::Seconds(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, pump: Pump, dose: Dose) -> Result<f64, PumpError> {
        if dose.amount() < 0.0 {
            return Err(PumpError::NegativeDose(dose.amount()));
        }
        self.calls.lock().push(PumpCall { pump, dose });
        Ok(dose.amount())
    }
}

#[async_trait]
impl PumpAdapter for FakePumps {
    async fn add_media(&self, dose: Dose) -> Result<f64, PumpError> {
        self.record(Pump::Media, dose)
    }

    async fn add_alt_media(&self, dose: Dose) -> Result<f64, PumpError> {
        self.record(Pump::AltMedia, dose)
    }

    async fn remove_waste(&self, dose: Dose) -> Result<f64, PumpError> {
        self.record(Pump::Waste, dose)
    }
}
