// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-bus: the pub/sub seam of the fleet.
//!
//! [`Bus`] is the client contract - publish with QoS/retain, pattern
//! subscriptions with callbacks, a reconnect hook, and clean disconnect.
//! [`mqtt::MqttBus`] backs it with rumqttc; the `test-support` feature adds
//! [`memory::MemoryBroker`], an in-process broker with retained messages and
//! last-will delivery, so control code runs identically in tests.

pub mod mqtt;
mod router;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use mqtt::{BusOptions, MqttBus};

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Delivery guarantee for a publish or subscription.
///
/// Commands that mutate state or log events use [`QoS::ExactlyOnce`];
/// high-volume telemetry uses [`QoS::AtMostOnce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// An inbound message handed to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Set when the broker served this from its retained store rather than
    /// relaying it fresh.
    pub retained: bool,
}

impl Message {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Parse the payload as a scalar; `None` on malformed input.
    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.text().trim().parse().ok()
    }
}

/// Message the broker publishes on our behalf if we vanish ungracefully.
#[derive(Debug, Clone)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// How a subscription filters and acknowledges messages.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    pub qos: QoS,
    /// When false, messages carrying the broker's retained flag are dropped
    /// before the callback sees them.
    pub allow_retained: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { qos: QoS::AtMostOnce, allow_retained: true }
    }
}

/// Subscription callback. Runs on the client's event-loop task and must not
/// block; do slow work elsewhere.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Hook invoked after every (re)connect acknowledgement.
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Client contract over the pub/sub broker.
pub trait Bus: Send + Sync {
    /// Publish, non-blocking: the message is enqueued onto the client's
    /// outgoing channel.
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), BusError>;

    /// Register `callback` for every pattern. Patterns that overlap each
    /// other within one call, or duplicate an already-registered pattern,
    /// are rejected before any message is delivered.
    fn subscribe(
        &self,
        patterns: &[String],
        opts: SubscribeOptions,
        callback: Callback,
    ) -> Result<(), BusError>;

    /// Replace the reconnect hook. The client re-registers its own
    /// subscriptions on reconnect; the hook is for owner-level work such as
    /// republishing lifecycle state over a stale last-will.
    fn set_on_reconnect(&self, hook: ReconnectHook);

    /// Clean disconnect: the broker discards the last-will.
    fn disconnect(&self) -> Result<(), BusError>;
}

/// Which of a job's two clients is being created.
pub enum BusRole {
    Publisher { last_will: LastWill },
    Subscriber,
}

/// Creates a job's clients; lets tests hand jobs an in-memory broker.
pub type BusFactory = Arc<dyn Fn(BusRole) -> Result<Arc<dyn Bus>, BusError> + Send + Sync>;

/// Bus client errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("duplicate subscription {0}: overlapping patterns would double-fire the callback")]
    DuplicateSubscription(String),

    #[error("failed to publish to {topic}: {detail}")]
    Publish { topic: String, detail: String },

    #[error("failed to subscribe to {pattern}: {detail}")]
    Subscribe { pattern: String, detail: String },

    #[error("client is disconnected")]
    Disconnected,
}
