//! Typed channel carrying decisions from the control loop to the MQTT
//! publisher
//!
//! The control loop never waits on the broker: a full queue drops the event
//! and counts it.

use crate::domain::types::{Decision, PhaseIndex, VehicleId, VehicleType, WeatherCondition};
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// One per-vehicle decision, as published on the events topic
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEvent {
    /// Identifies one controller run
    pub run: Uuid,
    pub step: u64,
    /// Simulation time in seconds
    pub sim_time: f64,
    pub vehicle_id: VehicleId,
    pub vehicle_type: VehicleType,
    pub weather: WeatherCondition,
    pub decision: Decision,
    pub phase: PhaseIndex,
    pub pedestrians: bool,
    /// Wall clock timestamp (epoch ms)
    pub ts: i64,
}

#[derive(Clone)]
pub struct DecisionSender {
    tx: mpsc::Sender<DecisionEvent>,
    metrics: Arc<Metrics>,
}

impl DecisionSender {
    /// Non-blocking send. Returns false if the event was dropped.
    pub fn send(&self, event: DecisionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.record_decision_dropped();
                debug!(vehicle_id = %event.vehicle_id, "decision_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_decision_dropped();
                false
            }
        }
    }

    /// Current queue depth
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Create the decision channel with `capacity` slots
pub fn create_decision_channel(
    capacity: usize,
    metrics: Arc<Metrics>,
) -> (DecisionSender, mpsc::Receiver<DecisionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DecisionSender { tx, metrics }, rx)
}
