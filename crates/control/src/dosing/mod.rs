// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dosing control: sensor cache, the volume-conserving pump primitive, and
//! the periodic tick.

mod algorithms;
mod controller;

#[cfg(test)]
pub(crate) mod test_support;

pub use algorithms::{DosingAlgorithm, MODES};
pub use controller::{ControllerOptions, DosingController};

use crate::alt_media::AltMediaCalculator;
use crate::job::{BackgroundJob, JobError, JobOptions, SettingCell, Settings};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pio_adapters::{Dose, PumpAdapter, PumpError};
use pio_bus::{BusError, BusFactory, Message, QoS, SubscribeOptions};
use pio_core::{topics, Event, Ident, JobState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Job name on the bus and in process lists.
pub const JOB_NAME: &str = "dosing_control";

/// Working volume of the culture vessel.
pub const VIAL_VOLUME_ML: f64 = 14.0;

/// Above this, one pump pass would swing the vial volume too far; the
/// exchange is split into two half-volume passes so the level re-equilibrates
/// between them.
const MAX_SINGLE_PASS_WASTE_ML: f64 = 0.5;

/// Pause after each addition so the bolus mixes before anything is removed.
const MIXING_DELAY: Duration = Duration::from_millis(2500);

/// Wait between retries while sensor streams warm up.
const SENSOR_WARMUP: Duration = Duration::from_secs(10);

/// Conservation tolerance for `|alt + media − waste|`.
const VOLUME_EPSILON: f64 = 1e-5;

/// Latest/previous pair for one sensor stream, updated atomically so a tick
/// never sees a torn pair.
#[derive(Clone, Default)]
pub struct SensorStream {
    inner: Arc<Mutex<(Option<f64>, Option<f64>)>>,
}

impl SensorStream {
    pub fn record(&self, value: f64) {
        let mut inner = self.inner.lock();
        inner.1 = inner.0;
        inner.0 = Some(value);
    }

    pub fn latest(&self) -> Option<f64> {
        self.inner.lock().0
    }

    pub fn previous(&self) -> Option<f64> {
        self.inner.lock().1
    }
}

/// Shared state every dosing algorithm works against: the background job,
/// the pump adapter, the sensor cache, and the editable dosing settings.
pub struct DosingCore {
    job: Arc<BackgroundJob>,
    pumps: Arc<dyn PumpAdapter>,
    pub od: SensorStream,
    pub growth_rate: SensorStream,
    pub sensor: SettingCell<String>,
    pub active: SettingCell<u8>,
    pub volume: SettingCell<Option<f64>>,
    pub target_od: SettingCell<Option<f64>>,
    pub target_growth_rate: SettingCell<Option<f64>>,
    alt_media: AltMediaCalculator,
}

impl DosingCore {
    /// Bring up the background job, declare the editable settings, and attach
    /// the sensor listeners.
    pub fn new(
        ident: Ident,
        options: &ControllerOptions,
        pumps: Arc<dyn PumpAdapter>,
        bus_factory: BusFactory,
        job_options: JobOptions,
    ) -> Result<Self, DosingError> {
        let sensor = SettingCell::new(options.sensor.clone());
        let active = SettingCell::new(1u8);
        let volume = SettingCell::new(options.volume);
        let target_od = SettingCell::new(options.target_od);
        let target_growth_rate = SettingCell::new(options.target_growth_rate);

        let mut settings = Settings::new();
        settings.register("volume", &volume);
        settings.register("target_od", &target_od);
        settings.register("target_growth_rate", &target_growth_rate);
        settings.register("sensor", &sensor);
        settings.register("active", &active);

        let job = BackgroundJob::create(JOB_NAME, ident, settings, bus_factory, job_options)?;
        let alt_media = AltMediaCalculator::start(&job)?;

        let core = Self {
            job,
            pumps,
            od: SensorStream::default(),
            growth_rate: SensorStream::default(),
            sensor,
            active,
            volume,
            target_od,
            target_growth_rate,
            alt_media,
        };
        core.start_sensor_listeners()?;
        Ok(core)
    }

    fn start_sensor_listeners(&self) -> Result<(), DosingError> {
        let ident = self.job.ident().clone();

        let od = self.od.clone();
        let od_topic =
            topics::experiment_topic(&ident, &format!("od_filtered/{}", self.sensor.get()));
        self.job.subscribe_and_callback(
            vec![od_topic],
            SubscribeOptions::default(),
            Arc::new(move |msg: &Message| {
                if let Some(value) = msg.parse::<f64>() {
                    od.record(value);
                }
            }),
        )?;

        let growth = self.growth_rate.clone();
        let growth_topic = topics::experiment_topic(&ident, "growth_rate");
        self.job.subscribe_and_callback(
            vec![growth_topic],
            SubscribeOptions::default(),
            Arc::new(move |msg: &Message| {
                if let Some(value) = msg.parse::<f64>() {
                    growth.record(value);
                }
            }),
        )?;
        Ok(())
    }

    pub fn job(&self) -> &Arc<BackgroundJob> {
        &self.job
    }

    pub fn alt_media_fraction(&self) -> f64 {
        self.alt_media.fraction()
    }

    /// One control tick: skip when paused, wait out the sensor warmup, then
    /// let the algorithm decide and announce the outcome.
    pub async fn run(
        &self,
        algorithm: &mut Box<dyn DosingAlgorithm>,
        counter: u64,
    ) -> Result<Event, DosingError> {
        if self.active.get() == 0 || self.job.state() == JobState::Sleeping {
            return Ok(Event::no_event("Paused. Set `active` to 1 to resume."));
        }

        // The only place a tick may block beyond its own cadence: readings
        // have not arrived yet, so retry on a bounded delay.
        let shutdown = self.job.shutdown_token();
        while self.od.latest().is_none() || self.growth_rate.latest().is_none() {
            debug!("sensor streams not ready; waiting");
            tokio::select! {
                _ = tokio::time::sleep(SENSOR_WARMUP) => {}
                _ = shutdown.cancelled() => return Ok(Event::no_event("Shutting down.")),
            }
        }

        let event = algorithm.execute(self, counter).await?;
        self.publish_log(&format!("[{JOB_NAME}]: triggered {event}."));
        Ok(event)
    }

    /// Volume-conserving actuation.
    ///
    /// Order is a hygiene choice: additions first (each followed by a mixing
    /// pause), waste aspirated last so the fresh bolus is diluted into the
    /// vial before any is removed. Waste volumes above the single-pass cap
    /// run as two half-volume passes; only the outermost call logs the
    /// original request to `io_batched`.
    pub fn execute_io_action(
        &self,
        alt_media_ml: f64,
        media_ml: f64,
        waste_ml: f64,
        log: bool,
    ) -> BoxFuture<'_, Result<(), DosingError>> {
        async move {
            for volume in [alt_media_ml, media_ml, waste_ml] {
                if volume < 0.0 {
                    return Err(DosingError::NegativeVolume(volume));
                }
            }
            if (alt_media_ml + media_ml - waste_ml).abs() >= VOLUME_EPSILON {
                return Err(DosingError::VolumeImbalance {
                    alt: alt_media_ml,
                    media: media_ml,
                    waste: waste_ml,
                });
            }

            if log {
                let record = serde_json::json!({
                    "alt_media_ml": alt_media_ml,
                    "media_ml": media_ml,
                    "waste_ml": waste_ml,
                });
                self.job.publish(
                    &topics::experiment_topic(self.job.ident(), "io_batched"),
                    record.to_string().as_bytes(),
                    QoS::ExactlyOnce,
                    false,
                )?;
            }

            if waste_ml > MAX_SINGLE_PASS_WASTE_ML {
                self.execute_io_action(alt_media_ml / 2.0, media_ml / 2.0, waste_ml / 2.0, false)
                    .await?;
                self.execute_io_action(alt_media_ml / 2.0, media_ml / 2.0, waste_ml / 2.0, false)
                    .await?;
            } else {
                if alt_media_ml > 0.0 {
                    self.pumps.add_alt_media(Dose::Ml(alt_media_ml)).await?;
                    tokio::time::sleep(MIXING_DELAY).await;
                }
                if media_ml > 0.0 {
                    self.pumps.add_media(Dose::Ml(media_ml)).await?;
                    tokio::time::sleep(MIXING_DELAY).await;
                }
                if waste_ml > 0.0 {
                    self.pumps.remove_waste(Dose::Ml(waste_ml)).await?;
                    // One extra second of aspiration pins the level to the
                    // waste tube's geometric height.
                    self.pumps.remove_waste(Dose::Seconds(1.0)).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Human-readable fleet log line, mirrored locally.
    pub fn publish_log(&self, message: &str) {
        info!("{message}");
        if let Err(e) = self.job.publish(
            &topics::experiment_topic(self.job.ident(), "log"),
            message.as_bytes(),
            QoS::AtMostOnce,
            false,
        ) {
            debug!("log publish failed: {e}");
        }
    }

    /// Terminal-failure log line, for observers watching `error_log`.
    pub fn publish_error_log(&self, message: &str) {
        tracing::error!("{message}");
        if let Err(e) = self.job.publish(
            &topics::experiment_topic(self.job.ident(), "error_log"),
            message.as_bytes(),
            QoS::AtLeastOnce,
            false,
        ) {
            debug!("error_log publish failed: {e}");
        }
    }

    /// Latest OD, available once `run` has passed the warmup gate.
    fn latest_od(&self) -> Result<f64, DosingError> {
        self.od.latest().ok_or(DosingError::MissingSensorReading("od"))
    }

    fn latest_growth_rate(&self) -> Result<f64, DosingError> {
        self.growth_rate.latest().ok_or(DosingError::MissingSensorReading("growth_rate"))
    }

    fn require(&self, cell: &SettingCell<Option<f64>>, name: &'static str) -> Result<f64, DosingError> {
        cell.get().ok_or(DosingError::MissingSetting(name))
    }
}

/// Dosing errors.
#[derive(Debug, Error)]
pub enum DosingError {
    #[error("unknown dosing mode `{0}`")]
    UnknownMode(String),

    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),

    #[error("missing sensor reading `{0}`")]
    MissingSensorReading(&'static str),

    #[error("volume conservation violated: alt={alt} media={media} waste={waste}")]
    VolumeImbalance { alt: f64, media: f64, waste: f64 },

    #[error("negative volume {0}")]
    NegativeVolume(f64),

    #[error(transparent)]
    Pump(#[from] PumpError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Job(#[from] JobError),
}

#[cfg(test)]
#[path = "core_tests.rs"]
mod tests;
