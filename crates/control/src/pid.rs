// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discrete PID controller with exposed internals and per-update telemetry.
//!
//! The caller owns the time units: `update` takes an explicit `dt`, and when
//! none is supplied the controller falls back to the wall-clock seconds it
//! has tracked since its previous sample. Gains may be negative - the
//! morbidostat controller relies on that so a rising growth rate *reduces*
//! its output.

use pio_bus::{Bus, QoS};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

struct Telemetry {
    bus: Arc<dyn Bus>,
    topic: String,
}

/// PID state. Parameters are fixed at construction but readable for
/// inspection; the integral term is clamped to the output limits
/// (anti-windup).
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    pub setpoint: f64,
    output_limits: (f64, f64),
    integral: f64,
    proportional: f64,
    derivative: f64,
    last_input: Option<f64>,
    last_output: Option<f64>,
    /// When the previous sample was taken; feeds the default `dt`.
    last_sample_at: Option<Instant>,
    telemetry: Option<Telemetry>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64, output_limits: (f64, f64)) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            output_limits,
            integral: 0.0,
            proportional: 0.0,
            derivative: 0.0,
            last_input: None,
            last_output: None,
            last_sample_at: None,
            telemetry: None,
        }
    }

    /// Publish a telemetry blob to `topic` after every update.
    pub fn with_telemetry(mut self, bus: Arc<dyn Bus>, topic: impl Into<String>) -> Self {
        self.telemetry = Some(Telemetry { bus, topic: topic.into() });
        self
    }

    /// One controller step. `dt` is in whatever unit the gains were tuned
    /// for; `None` means seconds elapsed since the last sample (zero on the
    /// first one).
    pub fn update(&mut self, input: f64, dt: Option<f64>) -> f64 {
        let now = Instant::now();
        let dt = dt.unwrap_or_else(|| {
            self.last_sample_at.map(|t| now.duration_since(t).as_secs_f64()).unwrap_or(0.0)
        });

        let error = self.setpoint - input;
        self.proportional = self.kp * error;
        self.integral = self.clamp(self.integral + self.ki * error * dt);

        // Derivative on measurement, so a setpoint change does not kick.
        let d_input = input - self.last_input.unwrap_or(input);
        self.derivative = if dt > 0.0 { -self.kd * d_input / dt } else { 0.0 };

        let output = self.clamp(self.proportional + self.integral + self.derivative);
        self.last_input = Some(input);
        self.last_output = Some(output);
        self.last_sample_at = Some(now);

        self.publish_telemetry();
        output
    }

    pub fn last_output(&self) -> Option<f64> {
        self.last_output
    }

    pub fn proportional(&self) -> f64 {
        self.proportional
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn derivative(&self) -> f64 {
        self.derivative
    }

    pub fn output_limits(&self) -> (f64, f64) {
        self.output_limits
    }

    /// Pretend the previous sample happened `by` earlier, so tests can
    /// exercise the elapsed-time `dt` path without sleeping.
    #[cfg(test)]
    fn backdate_last_sample(&mut self, by: std::time::Duration) {
        if let Some(at) = &mut self.last_sample_at {
            *at -= by;
        }
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.output_limits.0, self.output_limits.1)
    }

    fn publish_telemetry(&self) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let blob = serde_json::json!({
            "setpoint": self.setpoint,
            "output_limits_lb": self.output_limits.0,
            "output_limits_ub": self.output_limits.1,
            "Kp": self.kp,
            "Ki": self.ki,
            "Kd": self.kd,
            "integral": self.integral,
            "proportional": self.proportional,
            "derivative": self.derivative,
            "latest_input": self.last_input,
            "latest_output": self.last_output,
        });
        if let Err(e) = telemetry.bus.publish(
            &telemetry.topic,
            blob.to_string().as_bytes(),
            QoS::AtMostOnce,
            false,
        ) {
            warn!("pid telemetry publish failed: {e}");
        }
    }
}

#[cfg(test)]
#[path = "pid_tests.rs"]
mod tests;
