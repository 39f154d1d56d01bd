// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for dosing tests: an in-memory broker, fake pumps, and a
//! controller wired to both, with recorders on the observable topics.

use super::{ControllerOptions, DosingController};
use crate::job::JobOptions;
use parking_lot::Mutex;
use pio_adapters::fake::FakePumps;
use pio_bus::memory::MemoryBroker;
use pio_bus::{Bus, BusFactory, BusRole, Message, QoS, SubscribeOptions};
use pio_core::Ident;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Collects payload strings published to one topic.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    msgs: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn attach(broker: &MemoryBroker, name: &str, topic: &str) -> Self {
        let recorder = Self::default();
        let msgs = Arc::clone(&recorder.msgs);
        let client = broker.client(name, None);
        client
            .subscribe(
                &[topic.to_string()],
                SubscribeOptions::default(),
                Arc::new(move |msg: &Message| msgs.lock().push(msg.text().into_owned())),
            )
            .unwrap_or_else(|e| panic!("recorder subscribe failed: {e}"));
        recorder
    }

    pub fn all(&self) -> Vec<String> {
        self.msgs.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.msgs.lock().len()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.msgs.lock().iter().any(|m| m.contains(needle))
    }
}

pub(crate) fn bus_factory(broker: &MemoryBroker) -> BusFactory {
    let broker = broker.clone();
    let counter = Arc::new(AtomicUsize::new(0));
    Arc::new(move |role| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let bus: Arc<dyn Bus> = match role {
            BusRole::Publisher { last_will } => broker.client(format!("pub-{n}"), Some(last_will)),
            BusRole::Subscriber => broker.client(format!("sub-{n}"), None),
        };
        Ok(bus)
    })
}

#[derive(Debug)]
pub(crate) struct Fixture {
    pub broker: MemoryBroker,
    pub pumps: FakePumps,
    pub controller: DosingController,
    pub logs: Recorder,
    pub error_logs: Recorder,
    pub io_batched: Recorder,
}

impl Fixture {
    /// Build a controller; panics on startup errors (use
    /// [`try_fixture`] where failure is the point).
    pub fn new(options: ControllerOptions) -> Self {
        match try_fixture(options) {
            Ok(fixture) => fixture,
            Err(e) => panic!("fixture startup failed: {e}"),
        }
    }

    /// Publish a filtered OD reading the way the OD pipeline would.
    pub fn feed_od(&self, value: f64) {
        self.publish("pioreactor/pio1/exp/od_filtered/135/A", &value.to_string());
    }

    /// Publish a growth-rate estimate.
    pub fn feed_growth_rate(&self, value: f64) {
        self.publish("pioreactor/pio1/exp/growth_rate", &value.to_string());
    }

    /// Remote-write one editable setting.
    pub fn set(&self, attr: &str, value: &str) {
        self.publish(&format!("pioreactor/pio1/exp/dosing_control/{attr}/set"), value);
    }

    fn publish(&self, topic: &str, payload: &str) {
        let client = self.broker.client("feeder", None);
        client
            .publish(topic, payload.as_bytes(), QoS::ExactlyOnce, false)
            .unwrap_or_else(|e| panic!("feed publish failed: {e}"));
        client.disconnect().unwrap_or_else(|e| panic!("feeder disconnect failed: {e}"));
    }
}

pub(crate) fn try_fixture(options: ControllerOptions) -> Result<Fixture, super::DosingError> {
    let broker = MemoryBroker::new();
    let logs = Recorder::attach(&broker, "log-recorder", "pioreactor/pio1/exp/log");
    let error_logs = Recorder::attach(&broker, "err-recorder", "pioreactor/pio1/exp/error_log");
    let io_batched = Recorder::attach(&broker, "io-recorder", "pioreactor/pio1/exp/io_batched");

    let pumps = FakePumps::new();
    let controller = DosingController::create(
        Ident::new("pio1", "exp"),
        options,
        Arc::new(pumps.clone()),
        bus_factory(&broker),
        JobOptions::default(),
    )?;

    Ok(Fixture { broker, pumps, controller, logs, error_logs, io_batched })
}

/// Options for a turbidostat at `target_od`, exchanging `volume` per event.
pub(crate) fn turbidostat(target_od: f64, volume: f64) -> ControllerOptions {
    ControllerOptions {
        mode: "turbidostat".to_string(),
        target_od: Some(target_od),
        volume: Some(volume),
        ..Default::default()
    }
}
