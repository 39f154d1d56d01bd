// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alt-media fraction bookkeeper.
//!
//! Listens to the unit's `dosing_events` feed and tracks what share of the
//! vial currently holds alternative media, publishing it retained so any
//! observer (or a restarted job) can pick it up.

use crate::dosing::VIAL_VOLUME_ML;
use crate::job::{BackgroundJob, JobError};
use parking_lot::Mutex;
use pio_bus::{Message, QoS, SubscribeOptions};
use pio_core::topics;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct DosingEventRecord {
    volume_change: f64,
    event: String,
    #[allow(dead_code)]
    source_of_event: Option<String>,
}

/// Tracks the alt-media share of the vial from dosing events.
pub struct AltMediaCalculator {
    fraction: Arc<Mutex<f64>>,
}

impl AltMediaCalculator {
    /// Subscribe on the job's bus and start publishing `alt_media_fraction`
    /// retained on every dosing event.
    pub fn start(job: &Arc<BackgroundJob>) -> Result<Self, JobError> {
        let fraction = Arc::new(Mutex::new(0.0f64));
        let ident = job.ident().clone();
        let events_topic = topics::experiment_topic(&ident, "dosing_events");
        let out_topic = topics::experiment_topic(&ident, "alt_media_fraction");
        // Weak: publish through whatever client the job currently holds, and
        // don't keep the job alive from its own listener.
        let weak = Arc::downgrade(job);

        let fraction_cb = Arc::clone(&fraction);
        job.subscribe_and_callback(
            vec![events_topic],
            SubscribeOptions { qos: QoS::ExactlyOnce, ..Default::default() },
            Arc::new(move |msg: &Message| {
                let record: DosingEventRecord = match serde_json::from_slice(&msg.payload) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("unparseable dosing event: {e}");
                        return;
                    }
                };

                let updated = {
                    let mut fraction = fraction_cb.lock();
                    match record.event.as_str() {
                        // An addition mixes into the working volume; waste
                        // removal takes the mixture out without moving the
                        // fraction.
                        "add_alt_media" => {
                            *fraction = (*fraction * VIAL_VOLUME_ML + record.volume_change)
                                / (VIAL_VOLUME_ML + record.volume_change);
                        }
                        "add_media" => {
                            *fraction =
                                *fraction * VIAL_VOLUME_ML / (VIAL_VOLUME_ML + record.volume_change);
                        }
                        "remove_waste" => {}
                        other => {
                            debug!("ignoring dosing event kind {other}");
                        }
                    }
                    *fraction
                };

                if let Some(job) = weak.upgrade() {
                    if let Err(e) = job.publish(
                        &out_topic,
                        format!("{updated}").as_bytes(),
                        QoS::AtLeastOnce,
                        true,
                    ) {
                        debug!("alt_media_fraction publish failed: {e}");
                    }
                }
            }),
        )?;

        Ok(Self { fraction })
    }

    pub fn fraction(&self) -> f64 {
        *self.fraction.lock()
    }
}

#[cfg(test)]
#[path = "alt_media_tests.rs"]
mod tests;
