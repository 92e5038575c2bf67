//! MQTT publisher for traffic decisions
//!
//! - `<topic>` (default `traffic/priority`) - the plain decision string, one
//!   message per vehicle per tick
//! - `<events_topic>` (optional) - the full decision event as JSON

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::decision_channel::DecisionEvent;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for queued packets to leave after disconnect
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// (topic, payload) pairs produced for one decision
pub fn payloads_for(
    event: &DecisionEvent,
    topic: &str,
    events_topic: Option<&str>,
) -> Vec<(String, Vec<u8>)> {
    let mut out = vec![(topic.to_string(), event.decision.as_str().as_bytes().to_vec())];
    if let Some(events_topic) = events_topic {
        match serde_json::to_vec(event) {
            Ok(json) => out.push((events_topic.to_string(), json)),
            Err(e) => debug!(error = %e, "decision_event_serialize_failed"),
        }
    }
    out
}

/// MQTT publisher actor
///
/// Receives decisions from the decision channel and publishes them.
pub struct DecisionPublisher {
    client: AsyncClient,
    eventloop: JoinHandle<()>,
    rx: mpsc::Receiver<DecisionEvent>,
    topic: String,
    events_topic: Option<String>,
    qos: QoS,
    metrics: Arc<Metrics>,
}

impl DecisionPublisher {
    /// Create the publisher and spawn the MQTT event loop
    pub fn new(config: &Config, rx: mpsc::Receiver<DecisionEvent>, metrics: Arc<Metrics>) -> Self {
        let mut options =
            MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(config.mqtt_keep_alive());
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, config.mqtt_queue_size());

        let eventloop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_puback");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("mqtt_disconnected");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_connection_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            eventloop,
            rx,
            topic: config.mqtt_topic().to_string(),
            events_topic: config.mqtt_events_topic().map(str::to_string),
            qos: config.mqtt_qos(),
            metrics,
        }
    }

    /// Publish until the channel closes or shutdown is signalled, then drain
    /// what is queued and disconnect.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            events_topic = ?self.events_topic,
            qos = ?self.qos,
            "mqtt_publisher_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_publisher_shutdown");
                        break;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(event) => self.publish(&event),
                        None => break,
                    }
                }
            }
        }

        while let Ok(event) = self.rx.try_recv() {
            self.publish(&event);
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "mqtt_disconnect_failed");
        }
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut self.eventloop).await.is_err() {
            warn!("mqtt_flush_timeout");
            self.eventloop.abort();
        }
    }

    /// Hand the payloads to the client without waiting. A full request queue
    /// (broker unreachable) counts as a failed publish.
    fn publish(&self, event: &DecisionEvent) {
        for (topic, payload) in payloads_for(event, &self.topic, self.events_topic.as_deref()) {
            match self.client.try_publish(&topic, self.qos, false, payload) {
                Ok(()) => self.metrics.record_published(),
                Err(e) => {
                    self.metrics.record_publish_failed();
                    debug!(error = %e, topic = %topic, "mqtt_publish_failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Decision, PhaseIndex, VehicleId, VehicleType, WeatherCondition};
    use uuid::Uuid;

    fn event(decision: Decision) -> DecisionEvent {
        DecisionEvent {
            run: Uuid::nil(),
            step: 7,
            sim_time: 7.0,
            vehicle_id: VehicleId("ev9".to_string()),
            vehicle_type: VehicleType::from("emergency"),
            weather: WeatherCondition::Clear,
            decision,
            phase: PhaseIndex(0),
            pedestrians: true,
            ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_plain_decision_payload() {
        let payloads = payloads_for(&event(Decision::EmergencyPriority), "traffic/priority", None);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].0, "traffic/priority");
        assert_eq!(payloads[0].1, b"Priority to Emergency Vehicle".to_vec());
    }

    #[test]
    fn test_events_topic_adds_json() {
        let payloads = payloads_for(
            &event(Decision::NormalFlow),
            "traffic/priority",
            Some("traffic/decisions"),
        );
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].0, "traffic/decisions");
        let json: serde_json::Value = serde_json::from_slice(&payloads[1].1).unwrap();
        assert_eq!(json["decision"], "Normal Traffic Flow");
        assert_eq!(json["step"], 7);
        assert_eq!(json["pedestrians"], true);
    }

    #[tokio::test]
    async fn test_run_exits_when_channel_closes() {
        // Nothing listens on this port; the event loop just logs errors
        let config = Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\n").unwrap();
        let (tx, rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DecisionPublisher::new(&config, rx, Arc::new(Metrics::new()));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(10), publisher.run(shutdown_rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_broker_does_not_block_shutdown() {
        let config =
            Config::from_toml_str("[mqtt]\nhost = \"127.0.0.1\"\nport = 1\nqueue_size = 4\n")
                .unwrap();
        let metrics = Arc::new(Metrics::new());
        let (tx, rx) = mpsc::channel(32);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let publisher = DecisionPublisher::new(&config, rx, metrics.clone());
        let task = tokio::spawn(publisher.run(shutdown_rx));

        for _ in 0..20 {
            tx.send(event(Decision::NormalFlow)).await.unwrap();
        }
        drop(tx);

        tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        let summary = metrics.report();
        assert_eq!(summary.decisions_published + summary.publish_failures, 20);
        assert!(summary.publish_failures > 0);
    }
}
