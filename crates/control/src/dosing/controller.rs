// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller driver: resolves the algorithm, then runs the periodic tick
//! until the lifecycle shuts the job down.

use super::{algorithms, DosingAlgorithm, DosingCore, DosingError, JOB_NAME};
use crate::job::JobOptions;
use pio_adapters::PumpAdapter;
use pio_bus::BusFactory;
use pio_core::{Event, Ident};
use std::sync::Arc;
use std::time::Duration;

/// Driver inputs, straight off the CLI.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub mode: String,
    /// Minutes between ticks.
    pub duration_minutes: f64,
    /// Wait one full interval before the first tick.
    pub skip_first_run: bool,
    pub sensor: String,
    pub target_od: Option<f64>,
    pub target_growth_rate: Option<f64>,
    pub volume: Option<f64>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            mode: "silent".to_string(),
            duration_minutes: 30.0,
            skip_first_run: false,
            sensor: "135/A".to_string(),
            target_od: None,
            target_growth_rate: None,
            volume: None,
        }
    }
}

impl ControllerOptions {
    fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "target_od": self.target_od,
            "target_growth_rate": self.target_growth_rate,
            "volume": self.volume,
            "sensor": self.sensor,
        })
    }
}

/// One running dosing-control job.
pub struct DosingController {
    core: DosingCore,
    algorithm: Box<dyn DosingAlgorithm>,
    options: ControllerOptions,
}

impl std::fmt::Debug for DosingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DosingController").finish_non_exhaustive()
    }
}

impl DosingController {
    /// Resolve the mode, bring up the job, and announce the start. An
    /// unknown mode or a missing required setting fails here, before any
    /// tick runs.
    pub fn create(
        ident: Ident,
        options: ControllerOptions,
        pumps: Arc<dyn PumpAdapter>,
        bus_factory: BusFactory,
        job_options: JobOptions,
    ) -> Result<Self, DosingError> {
        let core = DosingCore::new(ident, &options, pumps, bus_factory, job_options)?;
        if !super::MODES.contains(&options.mode.as_str()) {
            return Err(DosingError::UnknownMode(options.mode.clone()));
        }

        core.publish_log(&format!(
            "[{JOB_NAME}]: starting {} with {}min intervals, metadata: {}",
            options.mode,
            options.duration_minutes,
            options.metadata(),
        ));

        let algorithm = algorithms::build(&options.mode, &core, options.duration_minutes)?;
        Ok(Self { core, algorithm, options })
    }

    pub fn core(&self) -> &DosingCore {
        &self.core
    }

    /// Run one tick immediately. Exposed for the tick loop and for tests
    /// that drive the cadence themselves.
    pub async fn tick(&mut self, counter: u64) -> Result<Event, DosingError> {
        self.core.run(&mut self.algorithm, counter).await
    }

    /// The periodic tick loop. Returns when the lifecycle reaches
    /// `disconnected`; a tick error is reported to `error_log` and
    /// propagated so the process can die loudly.
    ///
    /// An in-flight tick (including its pump runs) always completes before
    /// shutdown is observed; only the inter-tick sleep is interruptible.
    pub async fn run(mut self) -> Result<(), DosingError> {
        let shutdown = self.core.job().shutdown_token();
        let period = Duration::from_secs_f64(self.options.duration_minutes * 60.0);

        if self.options.skip_first_run {
            self.core.publish_log(&format!("[{JOB_NAME}]: skipping first run"));
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }

        let mut counter = 0u64;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self.tick(counter).await {
                self.core.publish_error_log(&format!("[{JOB_NAME}]: failed {e}"));
                return Err(e);
            }
            counter += 1;

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
