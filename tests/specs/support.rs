// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness shared by the end-to-end scenarios: one in-memory broker, fake
//! pumps, and a dosing controller wired to both.

use pio_adapters::fake::FakePumps;
use pio_bus::memory::MemoryBroker;
use pio_bus::{Bus, BusFactory, BusRole, Message, QoS, SubscribeOptions};
use pio_control::{ControllerOptions, DosingController, JobOptions};
use pio_core::Ident;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const UNIT: &str = "pio1";
pub const EXPERIMENT: &str = "exp";

/// Collects payloads published to one topic pattern.
#[derive(Clone, Default)]
pub struct Recorder {
    msgs: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn attach(broker: &MemoryBroker, name: &str, pattern: &str) -> Self {
        let recorder = Self::default();
        let msgs = Arc::clone(&recorder.msgs);
        let client = broker.client(name, None);
        client
            .subscribe(
                &[pattern.to_string()],
                SubscribeOptions::default(),
                Arc::new(move |msg: &Message| {
                    if let Ok(mut msgs) = msgs.lock() {
                        msgs.push(msg.text().into_owned());
                    }
                }),
            )
            .unwrap();
        recorder
    }

    pub fn count(&self) -> usize {
        self.msgs.lock().map(|m| m.len()).unwrap_or(0)
    }
}

pub struct Rig {
    pub broker: MemoryBroker,
    pub pumps: FakePumps,
    pub controller: DosingController,
    pub io_batched: Recorder,
}

pub fn bus_factory(broker: &MemoryBroker) -> BusFactory {
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

pub fn rig(options: ControllerOptions) -> Rig {
    let broker = MemoryBroker::new();
    let io_batched =
        Recorder::attach(&broker, "io-recorder", &format!("pioreactor/{UNIT}/{EXPERIMENT}/io_batched"));
    let pumps = FakePumps::new();
    let controller = DosingController::create(
        Ident::new(UNIT, EXPERIMENT),
        options,
        Arc::new(pumps.clone()),
        bus_factory(&broker),
        JobOptions::default(),
    )
    .unwrap_or_else(|e| panic!("controller startup failed: {e}"));

    Rig { broker, pumps, controller, io_batched }
}

impl Rig {
    pub fn publish(&self, topic: &str, payload: &str) {
        let client = self.broker.client("feeder", None);
        client.publish(topic, payload.as_bytes(), QoS::ExactlyOnce, false).unwrap();
        client.disconnect().unwrap();
    }

    pub fn feed_od(&self, value: f64) {
        self.publish(
            &format!("pioreactor/{UNIT}/{EXPERIMENT}/od_filtered/135/A"),
            &value.to_string(),
        );
    }

    pub fn feed_growth_rate(&self, value: f64) {
        self.publish(&format!("pioreactor/{UNIT}/{EXPERIMENT}/growth_rate"), &value.to_string());
    }

    pub fn set(&self, attr: &str, value: &str) {
        self.publish(&format!("pioreactor/{UNIT}/{EXPERIMENT}/dosing_control/{attr}/set"), value);
    }

    pub fn retained(&self, leaf: &str) -> Option<String> {
        self.broker.retained_text(&format!("pioreactor/{UNIT}/{EXPERIMENT}/dosing_control/{leaf}"))
    }
}

pub fn turbidostat(target_od: f64, volume: f64) -> ControllerOptions {
    ControllerOptions {
        mode: "turbidostat".to_string(),
        target_od: Some(target_od),
        volume: Some(volume),
        ..Default::default()
    }
}
