// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pump-primitive scenarios: safety splitting and volume conservation.

use super::support::{rig, turbidostat};
use pio_adapters::fake::PumpCall;
use pio_adapters::{Dose, Pump};
use pio_control::DosingError;

#[tokio::test(start_paused = true)]
async fn one_ml_exchange_splits_into_two_half_passes() {
    let r = rig(turbidostat(0.5, 0.4));
    r.controller.core().execute_io_action(0.0, 1.0, 1.0, true).await.unwrap();

    // Two half-volume passes of (media, waste, waste top-up): six pump runs.
    assert_eq!(
        r.pumps.calls(),
        vec![
            PumpCall { pump: Pump::Media, dose: Dose::Ml(0.5) },
            PumpCall { pump: Pump::Waste, dose: Dose::Ml(0.5) },
            PumpCall { pump: Pump::Waste, dose: Dose::Seconds(1.0) },
            PumpCall { pump: Pump::Media, dose: Dose::Ml(0.5) },
            PumpCall { pump: Pump::Waste, dose: Dose::Ml(0.5) },
            PumpCall { pump: Pump::Waste, dose: Dose::Seconds(1.0) },
        ]
    );
    // The original request is logged once, by the outermost call only.
    assert_eq!(r.io_batched.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn conservation_violations_never_reach_a_pump() {
    let r = rig(turbidostat(0.5, 0.4));
    let err = r.controller.core().execute_io_action(0.3, 0.3, 0.4, true).await.unwrap_err();
    assert!(matches!(err, DosingError::VolumeImbalance { .. }));
    assert!(r.pumps.calls().is_empty());
    assert_eq!(r.io_batched.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn waste_runs_last_after_additions_mix() {
    let r = rig(turbidostat(0.5, 0.4));
    r.controller.core().execute_io_action(0.1, 0.2, 0.3, true).await.unwrap();

    let pumps: Vec<Pump> = r.pumps.calls().iter().map(|c| c.pump).collect();
    assert_eq!(pumps, vec![Pump::AltMedia, Pump::Media, Pump::Waste, Pump::Waste]);
}
