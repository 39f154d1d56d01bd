// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rumqttc-backed bus client.
//!
//! Each client owns one event-loop task. Inbound publishes are routed to the
//! subscription table; on every connection acknowledgement the client
//! re-issues its subscriptions (the broker may have dropped the session) and
//! fires the owner's reconnect hook so a stale retained last-will gets
//! overwritten by the real state.

use crate::router::Router;
use crate::{Bus, BusError, Callback, LastWill, Message, QoS, ReconnectHook, SubscribeOptions};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connection parameters for one client.
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub last_will: Option<LastWill>,
}

impl BusOptions {
    pub fn from_config(broker: &pio_core::BrokerConfig, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            host: broker.host.clone(),
            port: broker.port,
            keepalive: Duration::from_secs(broker.keepalive_secs),
            last_will: None,
        }
    }

    pub fn with_last_will(mut self, will: LastWill) -> Self {
        self.last_will = Some(will);
        self
    }
}

/// MQTT bus client.
pub struct MqttBus {
    client: AsyncClient,
    router: Arc<Router>,
    on_reconnect: Arc<Mutex<Option<ReconnectHook>>>,
    cancel: CancellationToken,
}

impl MqttBus {
    /// Create the client and spawn its event-loop task. Must be called from
    /// within a tokio runtime.
    pub fn connect(opts: BusOptions) -> Arc<Self> {
        let mut mqtt = MqttOptions::new(opts.client_id, opts.host, opts.port);
        mqtt.set_keep_alive(opts.keepalive);
        if let Some(will) = opts.last_will {
            mqtt.set_last_will(rumqttc::LastWill::new(
                will.topic,
                will.payload,
                map_qos(will.qos),
                will.retain,
            ));
        }

        let (client, eventloop) = AsyncClient::new(mqtt, 32);
        let router = Arc::new(Router::new());
        let on_reconnect: Arc<Mutex<Option<ReconnectHook>>> = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&router),
            Arc::clone(&on_reconnect),
            cancel.clone(),
        ));

        Arc::new(Self { client, router, on_reconnect, cancel })
    }
}

impl Bus for MqttBus {
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Disconnected);
        }
        self.client
            .try_publish(topic, map_qos(qos), retain, payload.to_vec())
            .map_err(|e| BusError::Publish { topic: topic.to_string(), detail: e.to_string() })
    }

    fn subscribe(
        &self,
        patterns: &[String],
        opts: SubscribeOptions,
        callback: Callback,
    ) -> Result<(), BusError> {
        self.router.register(patterns, opts, callback)?;
        for pattern in patterns {
            self.client.try_subscribe(pattern.as_str(), map_qos(opts.qos)).map_err(|e| {
                BusError::Subscribe { pattern: pattern.clone(), detail: e.to_string() }
            })?;
        }
        Ok(())
    }

    fn set_on_reconnect(&self, hook: ReconnectHook) {
        *self.on_reconnect.lock() = Some(hook);
    }

    fn disconnect(&self) -> Result<(), BusError> {
        self.cancel.cancel();
        self.client
            .try_disconnect()
            .map_err(|e| BusError::Publish { topic: "$disconnect".into(), detail: e.to_string() })
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Event-loop task: routes publishes, handles reconnects.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    router: Arc<Router>,
    on_reconnect: Arc<Mutex<Option<ReconnectHook>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    router.dispatch(&Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                        retained: publish.retain,
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    debug!("connected to broker");
                    // The broker may have lost our session: re-issue every
                    // subscription, then let the owner republish state.
                    for (pattern, qos) in router.patterns() {
                        if let Err(e) = client.try_subscribe(pattern.as_str(), map_qos(qos)) {
                            warn!(pattern = %pattern, "re-subscribe failed: {e}");
                        }
                    }
                    let hook = on_reconnect.lock().clone();
                    if let Some(hook) = hook {
                        hook();
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("broker connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }
}

fn map_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}
