// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dosing decision scenarios, driven end to end over the bus.

use super::support::{rig, turbidostat, Rig};
use pio_adapters::Pump;
use pio_control::ControllerOptions;
use pio_core::Event;

#[tokio::test(start_paused = true)]
async fn turbidostat_triggers_above_target() {
    let mut r = rig(turbidostat(0.5, 0.4));
    r.feed_od(0.6);
    r.feed_growth_rate(0.1);

    let event = r.controller.tick(0).await.unwrap();
    assert!(matches!(event, Event::Dilution { .. }));
    assert_eq!(r.pumps.ml_doses(Pump::AltMedia), Vec::<f64>::new());
    assert_eq!(r.pumps.ml_doses(Pump::Media), vec![0.4]);
    assert_eq!(r.pumps.ml_doses(Pump::Waste), vec![0.4]);
    assert_eq!(r.io_batched.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn turbidostat_stays_quiet_below_target() {
    let mut r = rig(turbidostat(0.5, 0.4));
    r.feed_od(0.4);
    r.feed_growth_rate(0.1);

    let event = r.controller.tick(0).await.unwrap();
    assert!(matches!(event, Event::NoEvent { .. }));
    assert!(r.pumps.calls().is_empty());
    assert_eq!(r.io_batched.count(), 0);
}

fn morbidostat() -> Rig {
    rig(ControllerOptions {
        mode: "morbidostat".to_string(),
        target_od: Some(0.5),
        volume: Some(0.3),
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn morbidostat_skips_its_first_tick() {
    let mut r = morbidostat();
    r.feed_od(0.45);
    r.feed_growth_rate(0.1);

    let event = r.controller.tick(0).await.unwrap();
    assert_eq!(event.reason(), "Skip first event to wait for OD readings.");
    assert!(r.pumps.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn morbidostat_reacts_to_a_rising_od_sequence() {
    let mut r = morbidostat();
    r.feed_growth_rate(0.1);

    r.feed_od(0.4);
    assert!(matches!(r.controller.tick(0).await.unwrap(), Event::NoEvent { .. }));

    r.feed_od(0.55);
    assert!(matches!(r.controller.tick(1).await.unwrap(), Event::AltMedia { .. }));

    r.feed_od(0.60);
    assert!(matches!(r.controller.tick(2).await.unwrap(), Event::AltMedia { .. }));

    assert_eq!(r.pumps.ml_doses(Pump::AltMedia), vec![0.3, 0.3]);
}

#[tokio::test(start_paused = true)]
async fn pid_morbidostat_sizes_volume_from_growth_target() {
    // vol = target_growth_rate · vial volume · duration/60 = 0.5 · 14 · 1 = 7 mL
    let mut r = rig(ControllerOptions {
        mode: "pid_morbidostat".to_string(),
        target_od: Some(1.0),
        target_growth_rate: Some(0.5),
        duration_minutes: 60.0,
        ..Default::default()
    });
    r.feed_growth_rate(0.5);

    r.feed_od(1.05);
    let Event::AltMedia { media_ml: Some(media), alt_media_ml: Some(alt), .. } =
        r.controller.tick(0).await.unwrap()
    else {
        panic!("expected an alt media event");
    };
    assert_eq!(media + alt, 7.0);

    // Above 1.1 · target_od the exchange doubles for over-range recovery.
    r.feed_od(1.15);
    let Event::AltMedia { media_ml: Some(media), alt_media_ml: Some(alt), .. } =
        r.controller.tick(1).await.unwrap()
    else {
        panic!("expected an alt media event");
    };
    assert_eq!(media + alt, 14.0);
}

#[tokio::test(start_paused = true)]
async fn remote_pause_stops_dosing_and_retains_the_flag() {
    let mut r = rig(turbidostat(0.5, 0.4));
    r.feed_od(0.9);
    r.feed_growth_rate(0.1);

    r.set("active", "0");
    let event = r.controller.tick(0).await.unwrap();
    assert!(event.reason().starts_with("Paused"));
    assert!(r.pumps.calls().is_empty());
    assert_eq!(r.retained("active").as_deref(), Some("0"));

    // Resume and the next tick doses again.
    r.set("active", "1");
    let event = r.controller.tick(1).await.unwrap();
    assert!(matches!(event, Event::Dilution { .. }));
}
