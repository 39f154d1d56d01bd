// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription table shared by the MQTT and in-memory clients.
//!
//! Holds pattern → callback registrations, enforces the duplicate-
//! subscription guard, and dispatches inbound messages. Callbacks are cloned
//! out of the lock before being invoked, so a callback may publish (and
//! therefore re-enter dispatch) without deadlocking.

use crate::{BusError, Callback, Message, QoS, SubscribeOptions};
use parking_lot::Mutex;
use pio_core::topics;
use std::panic::AssertUnwindSafe;
use tracing::error;

pub(crate) struct Router {
    subs: Mutex<Vec<Subscription>>,
}

struct Subscription {
    patterns: Vec<String>,
    qos: QoS,
    allow_retained: bool,
    callback: Callback,
}

impl Router {
    pub fn new() -> Self {
        Self { subs: Mutex::new(Vec::new()) }
    }

    /// Register a callback for a set of patterns.
    ///
    /// Two patterns in the same call that topic-match each other would fire
    /// the callback twice for one message; a pattern string that is already
    /// registered would do the same on its existing callback. Both are
    /// rejected.
    pub fn register(
        &self,
        patterns: &[String],
        opts: SubscribeOptions,
        callback: Callback,
    ) -> Result<(), BusError> {
        for (i, a) in patterns.iter().enumerate() {
            for b in &patterns[i + 1..] {
                if topics::filters_overlap(a, b) {
                    return Err(BusError::DuplicateSubscription(format!("{a} / {b}")));
                }
            }
        }

        let mut subs = self.subs.lock();
        for sub in subs.iter() {
            for existing in &sub.patterns {
                if patterns.iter().any(|p| p == existing) {
                    return Err(BusError::DuplicateSubscription(existing.clone()));
                }
            }
        }

        subs.push(Subscription {
            patterns: patterns.to_vec(),
            qos: opts.qos,
            allow_retained: opts.allow_retained,
            callback,
        });
        Ok(())
    }

    /// Deliver a message to every matching subscription.
    ///
    /// A callback that panics is logged and contained; the event loop and the
    /// remaining callbacks keep running.
    pub fn dispatch(&self, msg: &Message) {
        let matched: Vec<Callback> = {
            let subs = self.subs.lock();
            subs.iter()
                .filter(|s| s.allow_retained || !msg.retained)
                .filter(|s| s.patterns.iter().any(|p| topics::matches(p, &msg.topic)))
                .map(|s| Callback::clone(&s.callback))
                .collect()
        };

        for callback in matched {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
                error!(topic = %msg.topic, "subscription callback panicked");
            }
        }
    }

    /// Snapshot of registered patterns, for broker-side re-subscription
    /// after a reconnect.
    pub fn patterns(&self) -> Vec<(String, QoS)> {
        self.subs
            .lock()
            .iter()
            .flat_map(|s| s.patterns.iter().map(|p| (p.clone(), s.qos)))
            .collect()
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
