// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process broker for tests.
//!
//! Models the broker behaviors the control stack depends on: wildcard
//! routing, the retained store (an empty retained payload clears the slot),
//! retained delivery to new subscribers, and last-will publication when a
//! client is dropped without a clean disconnect. Delivery is synchronous on
//! the publisher's task, which keeps test ordering deterministic.

use crate::router::Router;
use crate::{Bus, BusError, Callback, LastWill, Message, QoS, ReconnectHook, SubscribeOptions};
use parking_lot::Mutex;
use pio_core::topics;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared broker state; clone handles are cheap.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct BrokerInner {
    retained: BTreeMap<String, Vec<u8>>,
    clients: Vec<ClientEntry>,
}

struct ClientEntry {
    id: String,
    router: Arc<Router>,
    will: Option<LastWill>,
    hook: Arc<Mutex<Option<ReconnectHook>>>,
    connected: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client, optionally registering its last-will.
    pub fn client(&self, id: impl Into<String>, will: Option<LastWill>) -> Arc<MemoryBus> {
        let id = id.into();
        let router = Arc::new(Router::new());
        let hook: Arc<Mutex<Option<ReconnectHook>>> = Arc::new(Mutex::new(None));
        let connected = Arc::new(AtomicBool::new(true));

        self.inner.lock().clients.push(ClientEntry {
            id: id.clone(),
            router: Arc::clone(&router),
            will,
            hook: Arc::clone(&hook),
            connected: Arc::clone(&connected),
        });

        Arc::new(MemoryBus { id, broker: self.clone(), router, hook, connected })
    }

    /// The retained payload stored for a topic, if any.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.inner.lock().retained.get(topic).cloned()
    }

    /// Convenience: retained payload as a string.
    pub fn retained_text(&self, topic: &str) -> Option<String> {
        self.retained(topic).map(|p| String::from_utf8_lossy(&p).into_owned())
    }

    /// Drop a client ungracefully: its last-will (if any) is published, as a
    /// real broker would after a missed keepalive.
    pub fn drop_client(&self, id: &str) {
        let will = {
            let mut inner = self.inner.lock();
            let Some(pos) = inner.clients.iter().position(|c| c.id == id) else {
                return;
            };
            let entry = inner.clients.remove(pos);
            entry.connected.store(false, Ordering::SeqCst);
            entry.will
        };
        if let Some(will) = will {
            self.route(&will.topic, &will.payload, will.retain);
        }
    }

    /// Simulate a connection acknowledgement for one client, firing its
    /// reconnect hook the way the MQTT client does on ConnAck.
    pub fn reconnect(&self, id: &str) {
        let hook = {
            let inner = self.inner.lock();
            inner.clients.iter().find(|c| c.id == id).and_then(|c| c.hook.lock().clone())
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    fn route(&self, topic: &str, payload: &[u8], retain: bool) {
        let routers: Vec<Arc<Router>> = {
            let mut inner = self.inner.lock();
            if retain {
                if payload.is_empty() {
                    inner.retained.remove(topic);
                } else {
                    inner.retained.insert(topic.to_string(), payload.to_vec());
                }
            }
            inner
                .clients
                .iter()
                .filter(|c| c.connected.load(Ordering::SeqCst))
                .map(|c| Arc::clone(&c.router))
                .collect()
        };

        // Served fresh, so the retained flag is clear even for retain=true
        // publishes; only replays from the retained store set it.
        let msg = Message { topic: topic.to_string(), payload: payload.to_vec(), retained: false };
        for router in routers {
            router.dispatch(&msg);
        }
    }

    fn retained_matching(&self, patterns: &[String]) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.lock();
        inner
            .retained
            .iter()
            .filter(|(topic, _)| patterns.iter().any(|p| topics::matches(p, topic)))
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect()
    }

    fn mark_disconnected(&self, id: &str) {
        let mut inner = self.inner.lock();
        // Clean disconnect: the will is discarded with the client entry.
        if let Some(pos) = inner.clients.iter().position(|c| c.id == id) {
            let entry = inner.clients.remove(pos);
            entry.connected.store(false, Ordering::SeqCst);
        }
    }
}

/// One attached client.
pub struct MemoryBus {
    id: String,
    broker: MemoryBroker,
    router: Arc<Router>,
    hook: Arc<Mutex<Option<ReconnectHook>>>,
    connected: Arc<AtomicBool>,
}

impl Bus for MemoryBus {
    fn publish(&self, topic: &str, payload: &[u8], _qos: QoS, retain: bool) -> Result<(), BusError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::Disconnected);
        }
        self.broker.route(topic, payload, retain);
        Ok(())
    }

    fn subscribe(
        &self,
        patterns: &[String],
        opts: SubscribeOptions,
        callback: Callback,
    ) -> Result<(), BusError> {
        self.router.register(patterns, opts, Callback::clone(&callback))?;

        // New subscribers immediately receive matching retained messages,
        // flagged as retained so the allow_retained filter applies.
        if opts.allow_retained {
            for (topic, payload) in self.broker.retained_matching(patterns) {
                callback(&Message { topic, payload, retained: true });
            }
        }
        Ok(())
    }

    fn set_on_reconnect(&self, hook: ReconnectHook) {
        *self.hook.lock() = Some(hook);
    }

    fn disconnect(&self) -> Result<(), BusError> {
        self.broker.mark_disconnected(&self.id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
