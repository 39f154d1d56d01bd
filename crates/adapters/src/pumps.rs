// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calibrated pump driver.

use crate::{Dose, Pump, PumpAdapter, PumpError};
use async_trait::async_trait;
use pio_bus::{Bus, QoS};
use pio_core::{topics, Ident, PumpRates};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Drives pumps through the linear ml↔seconds coefficients from config and
/// publishes a `dosing_events` record for every run.
pub struct CalibratedPumps {
    bus: Arc<dyn Bus>,
    ident: Ident,
    rates: PumpRates,
    /// Recorded in each dosing event so downstream consumers can attribute
    /// volume changes (e.g. "dosing_control" vs a manual CLI run).
    source_of_event: String,
}

impl CalibratedPumps {
    pub fn new(
        bus: Arc<dyn Bus>,
        ident: Ident,
        rates: PumpRates,
        source_of_event: impl Into<String>,
    ) -> Self {
        Self { bus, ident, rates, source_of_event: source_of_event.into() }
    }

    fn rate(&self, pump: Pump) -> f64 {
        match pump {
            Pump::Media => self.rates.media_ml_per_second,
            Pump::AltMedia => self.rates.alt_media_ml_per_second,
            Pump::Waste => self.rates.waste_ml_per_second,
        }
    }

    async fn run(&self, pump: Pump, dose: Dose) -> Result<f64, PumpError> {
        if dose.amount() < 0.0 {
            return Err(PumpError::NegativeDose(dose.amount()));
        }
        let rate = self.rate(pump);
        if rate <= 0.0 {
            return Err(PumpError::BadCalibration(rate));
        }

        let (ml, seconds) = match dose {
            Dose::Ml(ml) => (ml, ml / rate),
            Dose::Seconds(s) => (s * rate, s),
        };

        let record = serde_json::json!({
            "volume_change": ml,
            "event": pump.event_name(),
            "source_of_event": self.source_of_event,
        });
        self.bus.publish(
            &topics::experiment_topic(&self.ident, "dosing_events"),
            record.to_string().as_bytes(),
            QoS::ExactlyOnce,
            false,
        )?;

        info!(event = pump.event_name(), ml = format!("{ml:.2}"), "pump run");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(ml)
    }
}

#[async_trait]
impl PumpAdapter for CalibratedPumps {
    async fn add_media(&self, dose: Dose) -> Result<f64, PumpError> {
        self.run(Pump::Media, dose).await
    }

    async fn add_alt_media(&self, dose: Dose) -> Result<f64, PumpError> {
        self.run(Pump::AltMedia, dose).await
    }

    async fn remove_waste(&self, dose: Dose) -> Result<f64, PumpError> {
        self.run(Pump::Waste, dose).await
    }
}

#[cfg(test)]
#[path = "pumps_tests.rs"]
mod tests;
