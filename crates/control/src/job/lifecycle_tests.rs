// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pio_bus::memory::MemoryBroker;
use pio_bus::{Bus, BusFactory, BusRole, QoS};
use pio_core::{Ident, JobState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Harness {
    broker: MemoryBroker,
    job: Arc<BackgroundJob>,
    volume: SettingCell<Option<f64>>,
    active: SettingCell<u8>,
}

fn bus_factory(broker: &MemoryBroker, prefix: &str) -> BusFactory {
    let broker = broker.clone();
    let prefix = prefix.to_string();
    let counter = Arc::new(AtomicUsize::new(0));
    Arc::new(move |role| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let bus: Arc<dyn Bus> = match role {
            BusRole::Publisher { last_will } => {
                broker.client(format!("{prefix}-pub-{n}"), Some(last_will))
            }
            BusRole::Subscriber => broker.client(format!("{prefix}-sub-{n}"), None),
        };
        Ok(bus)
    })
}

fn harness(job_name: &str) -> Harness {
    let broker = MemoryBroker::new();
    let volume = SettingCell::new(Some(0.5f64));
    let active = SettingCell::new(1u8);
    let mut settings = Settings::new();
    settings.register("volume", &volume);
    settings.register("active", &active);

    let job = BackgroundJob::create(
        job_name,
        Ident::new("pio1", "exp"),
        settings,
        bus_factory(&broker, "t"),
        JobOptions::default(),
    )
    .unwrap();

    Harness { broker, job, volume, active }
}

fn publish_from(broker: &MemoryBroker, topic: &str, payload: &str) {
    let client = broker.client("driver", None);
    client.publish(topic, payload.as_bytes(), QoS::ExactlyOnce, false).unwrap();
    client.disconnect().unwrap();
}

#[test]
fn create_reaches_ready_and_declares_properties() {
    let h = harness("job_a");
    assert_eq!(h.job.state(), JobState::Ready);

    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_a/$state").as_deref(), Some("ready"));
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_a/$properties").as_deref(),
        Some("volume,active,state")
    );
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_a/volume/$settable").as_deref(),
        Some("true")
    );
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_a/state/$settable").as_deref(),
        Some("true")
    );
    // Initial setting values are fanned out retained.
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_a/volume").as_deref(), Some("0.5"));
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_a/active").as_deref(), Some("1"));
}

#[test]
fn remote_setting_write_updates_cell_and_republishes() {
    let h = harness("job_b");
    publish_from(&h.broker, "pioreactor/pio1/exp/job_b/volume/set", "0.8");

    assert_eq!(h.volume.get(), Some(0.8));
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_b/volume").as_deref(), Some("0.8"));
}

#[test]
fn broadcast_setting_write_applies() {
    let h = harness("job_c");
    publish_from(&h.broker, "pioreactor/$broadcast/exp/job_c/active/set", "0");
    assert_eq!(h.active.get(), 0);
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_c/active").as_deref(), Some("0"));
}

#[test]
fn unknown_setting_is_silently_ignored() {
    let h = harness("job_d");
    publish_from(&h.broker, "pioreactor/pio1/exp/job_d/nonsense/set", "1");
    assert!(h.broker.retained("pioreactor/pio1/exp/job_d/nonsense").is_none());
    assert_eq!(h.job.state(), JobState::Ready);
}

#[test]
fn malformed_numeric_payload_keeps_previous_value() {
    let h = harness("job_e");
    publish_from(&h.broker, "pioreactor/pio1/exp/job_e/volume/set", "plenty");
    assert_eq!(h.volume.get(), Some(0.5));
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_e/volume").as_deref(), Some("0.5"));
}

#[test]
fn remote_sleep_transition_is_visible_retained() {
    let h = harness("job_f");
    publish_from(&h.broker, "pioreactor/pio1/exp/job_f/state/set", "sleeping");

    assert_eq!(h.job.state(), JobState::Sleeping);
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_f/$state").as_deref(),
        Some("sleeping")
    );

    // And back to ready.
    publish_from(&h.broker, "pioreactor/pio1/exp/job_f/state/set", "ready");
    assert_eq!(h.job.state(), JobState::Ready);
}

#[test]
fn lost_cannot_be_entered_remotely() {
    let h = harness("job_g");
    publish_from(&h.broker, "pioreactor/pio1/exp/job_g/state/set", "lost");
    assert_eq!(h.job.state(), JobState::Ready);
}

#[test]
fn disconnect_runs_hook_publishes_state_and_cancels() {
    let h = harness("job_h");
    let hook_ran = Arc::new(AtomicBool::new(false));
    let hook_ran2 = Arc::clone(&hook_ran);
    h.job.set_on_disconnect(Box::new(move || {
        hook_ran2.store(true, Ordering::SeqCst);
        Ok(())
    }));

    h.job.set_state(JobState::Disconnected).unwrap();

    assert!(hook_ran.load(Ordering::SeqCst));
    assert!(h.job.shutdown_token().is_cancelled());
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_h/$state").as_deref(),
        Some("disconnected")
    );
    // Clients are gone: further publishes fail.
    assert!(h.job.publish("x", b"1", QoS::AtMostOnce, false).is_err());
}

#[test]
fn failing_disconnect_hook_does_not_stop_teardown() {
    let h = harness("job_i");
    h.job
        .set_on_disconnect(Box::new(|| Err(JobError::InvalidState(JobState::Lost))));
    h.job.set_state(JobState::Disconnected).unwrap();
    assert_eq!(h.job.state(), JobState::Disconnected);
    assert!(h.job.shutdown_token().is_cancelled());
}

#[test]
fn clean_shutdown_leaves_disconnected_not_lost() {
    let h = harness("job_j");
    h.job.set_state(JobState::Disconnected).unwrap();

    // Even if the broker now reaps the clients, no last-will fires.
    h.broker.drop_client("t-pub-0");
    assert_eq!(
        h.broker.retained_text("pioreactor/pio1/exp/job_j/$state").as_deref(),
        Some("disconnected")
    );
}

#[test]
fn ungraceful_drop_surfaces_lost() {
    let h = harness("job_k");
    h.broker.drop_client("t-pub-0");
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_k/$state").as_deref(), Some("lost"));
}

#[test]
fn reconnect_republishes_state_over_stale_last_will() {
    let h = harness("job_l");

    // Simulate the broker having served the last-will during a blip.
    let driver = h.broker.client("driver", None);
    driver.publish("pioreactor/pio1/exp/job_l/$state", b"lost", QoS::ExactlyOnce, true).unwrap();
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_l/$state").as_deref(), Some("lost"));

    h.broker.reconnect("t-sub-1");
    assert_eq!(h.broker.retained_text("pioreactor/pio1/exp/job_l/$state").as_deref(), Some("ready"));
}

#[test]
fn remote_reinit_replays_passive_listeners() {
    let h = harness("job_m");

    publish_from(&h.broker, "pioreactor/pio1/exp/job_m/state/set", "init");
    assert_eq!(h.job.state(), JobState::Init);

    // The fresh subscriber must still route setting writes.
    publish_from(&h.broker, "pioreactor/pio1/exp/job_m/volume/set", "1.25");
    assert_eq!(h.volume.get(), Some(1.25));
}

#[test]
fn duplicate_job_name_on_host_fails_construction() {
    // A foreign process whose argv carries the job name stands in for a
    // second instance ($0 of `sh -c` is settable).
    let marker = format!("dupjob{}", std::process::id());
    let mut child = std::process::Command::new("sh")
        .args(["-c", "sleep 5", &marker])
        .spawn()
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(300));

    let broker = MemoryBroker::new();
    let err = BackgroundJob::create(
        &marker,
        Ident::new("pio1", "exp"),
        Settings::new(),
        bus_factory(&broker, "dup"),
        JobOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, JobError::DuplicateJob(_)));

    child.kill().ok();
    child.wait().ok();
}
