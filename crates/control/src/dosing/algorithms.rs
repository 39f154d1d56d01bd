// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The five dosing strategies, behind one capability interface and a
//! registry keyed by mode name.

use super::{DosingCore, DosingError, JOB_NAME, VIAL_VOLUME_ML};
use crate::pid::Pid;
use async_trait::async_trait;
use pio_core::{topics, Event};

/// A dosing decision policy, invoked once per tick.
#[async_trait]
pub trait DosingAlgorithm: Send {
    async fn execute(&mut self, core: &DosingCore, counter: u64) -> Result<Event, DosingError>;
}

/// Registry keys, in the order the CLI documents them.
pub const MODES: [&str; 5] =
    ["silent", "morbidostat", "turbidostat", "pid_turbidostat", "pid_morbidostat"];

/// Resolve a mode name. Unknown modes and missing required settings are
/// startup failures, before the first tick.
pub(super) fn build(
    mode: &str,
    core: &DosingCore,
    duration_minutes: f64,
) -> Result<Box<dyn DosingAlgorithm>, DosingError> {
    match mode {
        "silent" => Ok(Box::new(Silent)),
        "morbidostat" => {
            core.require(&core.target_od, "target_od")?;
            core.require(&core.volume, "volume")?;
            Ok(Box::new(Morbidostat))
        }
        "turbidostat" => {
            core.require(&core.target_od, "target_od")?;
            core.require(&core.volume, "volume")?;
            Ok(Box::new(Turbidostat))
        }
        "pid_turbidostat" => Ok(Box::new(PidTurbidostat::new(core)?)),
        "pid_morbidostat" => Ok(Box::new(PidMorbidostat::new(core, duration_minutes)?)),
        other => Err(DosingError::UnknownMode(other.to_string())),
    }
}

/// Observes, never doses.
struct Silent;

#[async_trait]
impl DosingAlgorithm for Silent {
    async fn execute(&mut self, _core: &DosingCore, _counter: u64) -> Result<Event, DosingError> {
        Ok(Event::no_event("Never execute IO events in Silent mode"))
    }
}

/// Hold cell density at a setpoint by exchanging fresh media against waste
/// whenever OD reaches the target.
struct Turbidostat;

#[async_trait]
impl DosingAlgorithm for Turbidostat {
    async fn execute(&mut self, core: &DosingCore, _counter: u64) -> Result<Event, DosingError> {
        let od = core.latest_od()?;
        let target_od = core.require(&core.target_od, "target_od")?;
        let volume = core.require(&core.volume, "volume")?;

        if od >= target_od {
            core.execute_io_action(0.0, volume, volume, true).await?;
            Ok(Event::dilution(format!("latest OD={od:.2}V >= target OD={target_od:.2}V")))
        } else {
            Ok(Event::no_event(format!("latest OD={od:.2}V < target OD={target_od:.2}V")))
        }
    }
}

/// Turbidostat with a PID shaping the exchanged volume: the controller
/// output approaches 1 as OD settles on the setpoint, shrinking the
/// exchanged volume toward zero.
struct PidTurbidostat {
    pid: Pid,
}

impl PidTurbidostat {
    fn new(core: &DosingCore) -> Result<Self, DosingError> {
        let target_od = core.require(&core.target_od, "target_od")?;
        core.require(&core.volume, "volume")?;
        let pid = Pid::new(0.07, 0.05, 0.2, target_od, (0.0, 1.0)).with_telemetry(
            core.job().publisher(),
            topics::experiment_topic(core.job().ident(), "pid_log"),
        );
        Ok(Self { pid })
    }
}

#[async_trait]
impl DosingAlgorithm for PidTurbidostat {
    async fn execute(&mut self, core: &DosingCore, _counter: u64) -> Result<Event, DosingError> {
        let od = core.latest_od()?;
        let target_od = core.require(&core.target_od, "target_od")?;
        let volume = core.require(&core.volume, "volume")?;
        let min_od = 0.75 * target_od;

        if od <= min_od {
            return Ok(Event::no_event(format!(
                "current OD, {od:.2}, less than OD to start diluting, {min_od:.2}"
            )));
        }

        let output = self.pid.update(od, None);
        let volume_to_cycle = (1.0 - output) * volume;
        if volume_to_cycle == 0.0 {
            Ok(Event::no_event(format!("PID output={output:.2}, so no volume to cycle")))
        } else {
            core.execute_io_action(0.0, volume_to_cycle, volume_to_cycle, true).await?;
            Ok(Event::dilution(format!(
                "PID output={output:.2}, volume to cycle={volume_to_cycle:.2}mL"
            )))
        }
    }
}

/// Hold cell density below a threshold with a toxic alternative media,
/// dosing it only while growth outpaces dilution (Toprak 2013).
struct Morbidostat;

#[async_trait]
impl DosingAlgorithm for Morbidostat {
    async fn execute(&mut self, core: &DosingCore, _counter: u64) -> Result<Event, DosingError> {
        let od = core.latest_od()?;
        let target_od = core.require(&core.target_od, "target_od")?;
        let volume = core.require(&core.volume, "volume")?;

        let Some(previous_od) = core.od.previous() else {
            return Ok(Event::no_event("Skip first event to wait for OD readings."));
        };

        if od >= target_od && od >= previous_od {
            // Above the threshold and still rising: growth rate exceeds the
            // dilution rate (the monotone rise approximates that).
            core.execute_io_action(volume, 0.0, volume, true).await?;
            Ok(Event::alt_media(format!(
                "Latest OD, {od:.2} >= Target OD, {target_od:.2} and Latest OD, {od:.2} >= Previous OD, {previous_od:.2}"
            )))
        } else {
            core.execute_io_action(0.0, volume, volume, true).await?;
            Ok(Event::dilution(format!(
                "Latest OD, {od:.2} < Target OD, {target_od:.2} or Latest OD, {od:.2} < Previous OD, {previous_od:.2}"
            )))
        }
    }
}

/// Morbidostat with a PID splitting each exchange between fresh and
/// alternative media (Zhong 2020). Gains are negative so a growth rate above
/// the target *raises* the alt-media fraction.
struct PidMorbidostat {
    pid: Pid,
    duration_minutes: f64,
    volume_per_tick: f64,
}

impl PidMorbidostat {
    fn new(core: &DosingCore, duration_minutes: f64) -> Result<Self, DosingError> {
        let target_growth_rate = core.require(&core.target_growth_rate, "target_growth_rate")?;
        core.require(&core.target_od, "target_od")?;

        if core.volume.get().is_some() {
            core.publish_log(&format!(
                "[{JOB_NAME}]: Ignoring volume parameter; volume set by target growth rate and duration."
            ));
        }

        let pid = Pid::new(-2.00, -0.01, -0.05, target_growth_rate, (0.0, 1.0)).with_telemetry(
            core.job().publisher(),
            topics::experiment_topic(core.job().ident(), "pid_log"),
        );

        // Per-tick exchange sized so that, held at the target growth rate,
        // the dilution rate cancels growth over one interval.
        let volume_per_tick = target_growth_rate * VIAL_VOLUME_ML * (duration_minutes / 60.0);

        Ok(Self { pid, duration_minutes, volume_per_tick })
    }
}

#[async_trait]
impl DosingAlgorithm for PidMorbidostat {
    async fn execute(&mut self, core: &DosingCore, _counter: u64) -> Result<Event, DosingError> {
        let od = core.latest_od()?;
        let growth_rate = core.latest_growth_rate()?;
        let target_od = core.require(&core.target_od, "target_od")?;
        let min_od = 0.75 * target_od;
        let max_od = 1.1 * target_od;

        if od <= min_od {
            return Ok(Event::no_event(format!(
                "Latest OD less than OD to start diluting, {min_od:.2}"
            )));
        }

        // dt is deliberately in minutes, not seconds: the gains above were
        // tuned against minute-valued sample intervals.
        let fraction_alt_media = self.pid.update(growth_rate, Some(self.duration_minutes));

        let volume = if od > max_od {
            // Above the linear sensing range: dilute twice as hard until OD
            // comes back down.
            core.publish_log(&format!(
                "[{JOB_NAME}]: executing double dilution since we are above max OD, {max_od:.2}."
            ));
            2.0 * self.volume_per_tick
        } else {
            self.volume_per_tick
        };

        let alt_media_ml = fraction_alt_media * volume;
        let media_ml = volume - alt_media_ml;

        core.execute_io_action(alt_media_ml, media_ml, volume, true).await?;
        Ok(Event::AltMedia {
            reason: format!(
                "PID output={fraction_alt_media:.2}, alt_media_ml={alt_media_ml:.2}mL, media_ml={media_ml:.2}mL"
            ),
            media_ml: Some(media_ml),
            alt_media_ml: Some(alt_media_ml),
        })
    }
}

#[cfg(test)]
#[path = "algorithms_tests.rs"]
mod tests;
