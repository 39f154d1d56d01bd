// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle visibility scenarios: retained state, clean vs lost shutdown.

use super::support::{rig, turbidostat};
use pio_core::JobState;

#[tokio::test(start_paused = true)]
async fn remote_sleep_is_visible_within_one_round_trip() {
    let r = rig(turbidostat(0.5, 0.4));
    r.set("state", "sleeping");
    assert_eq!(r.retained("$state").as_deref(), Some("sleeping"));
    assert_eq!(r.controller.core().job().state(), JobState::Sleeping);
}

#[tokio::test(start_paused = true)]
async fn clean_shutdown_retains_disconnected() {
    let r = rig(turbidostat(0.5, 0.4));
    r.controller.core().job().set_state(JobState::Disconnected).unwrap();

    assert_eq!(r.retained("$state").as_deref(), Some("disconnected"));
    assert!(r.controller.core().job().shutdown_token().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn ungraceful_death_surfaces_the_lost_last_will() {
    let r = rig(turbidostat(0.5, 0.4));
    assert_eq!(r.retained("$state").as_deref(), Some("ready"));

    // The broker reaps the publisher without a clean disconnect.
    r.broker.drop_client("pub-0");
    assert_eq!(r.retained("$state").as_deref(), Some("lost"));
}

#[tokio::test(start_paused = true)]
async fn settings_declaration_is_retained_for_late_observers() {
    let r = rig(turbidostat(0.5, 0.4));
    assert_eq!(
        r.retained("$properties").as_deref(),
        Some("volume,target_od,target_growth_rate,sensor,active,state")
    );
    assert_eq!(r.retained("volume").as_deref(), Some("0.4"));
    assert_eq!(r.retained("target_od").as_deref(), Some("0.5"));
    assert_eq!(r.retained("sensor").as_deref(), Some("135/A"));
    assert_eq!(r.retained("active").as_deref(), Some("1"));
    assert_eq!(r.retained("volume/$settable").as_deref(), Some("true"));
}
