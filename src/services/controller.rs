//! Control loop: read simulator state, decide, publish, write phases, step
//!
//! One tick:
//! 1. stop if shutdown was requested, the step limit is reached or the
//!    simulator expects no more vehicles
//! 2. take the current weather (cached by [`WeatherService`])
//! 3. for every vehicle: decide from its type and the weather, publish the
//!    decision, force the matching phase on the controlled light
//! 4. advance the simulation by one step
//!
//! The simulator connection is closed whatever way the loop ends.

use crate::domain::policy::{decide, phase_for, PhasePlan};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::decision_channel::{DecisionEvent, DecisionSender};
use crate::io::traci::SimulationControl;
use crate::io::weather::WeatherService;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Broadcast shutdown once `signal` fires. A signal handler that failed to
/// install leaves the run going.
pub async fn shutdown_on_signal<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("shutdown_signal_received");
            let _ = shutdown.send(true);
        }
        Err(e) => warn!(error = %e, "signal_handler_install_failed"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No vehicles running or waiting to depart
    Finished,
    StepLimit,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: u64,
    pub reason: StopReason,
}

pub struct ControlLoop<S: SimulationControl> {
    sim: S,
    weather: WeatherService,
    decisions: DecisionSender,
    metrics: Arc<Metrics>,
    tls_id: String,
    plan: PhasePlan,
    max_steps: Option<u64>,
    run_id: Uuid,
}

impl<S: SimulationControl> ControlLoop<S> {
    pub fn new(
        config: &Config,
        sim: S,
        weather: WeatherService,
        decisions: DecisionSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sim,
            weather,
            decisions,
            metrics,
            tls_id: config.tls_id().to_string(),
            plan: config.phase_plan(),
            max_steps: config.max_steps(),
            run_id: Uuid::now_v7(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run to completion, then close the simulator connection. The first
    /// error (loop or close) is returned.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<RunSummary> {
        info!(
            run = %self.run_id,
            tls_id = %self.tls_id,
            max_steps = ?self.max_steps,
            "control_loop_started"
        );

        let result = self.run_ticks(&mut shutdown).await;
        let closed = self.sim.close().await;

        match (&result, &closed) {
            (Ok(summary), _) => {
                info!(steps = summary.steps, reason = ?summary.reason, "control_loop_finished")
            }
            (Err(e), _) => warn!(error = %format!("{:#}", e), "control_loop_failed"),
        }
        if let Err(e) = &closed {
            warn!(error = %format!("{:#}", e), "simulator_close_failed");
        }

        let summary = result?;
        closed?;
        Ok(summary)
    }

    async fn run_ticks(&mut self, shutdown: &mut watch::Receiver<bool>) -> anyhow::Result<RunSummary> {
        let mut steps = 0u64;
        loop {
            if *shutdown.borrow() {
                return Ok(RunSummary { steps, reason: StopReason::Shutdown });
            }
            if self.max_steps.is_some_and(|max| steps >= max) {
                return Ok(RunSummary { steps, reason: StopReason::StepLimit });
            }
            if self.sim.min_expected_vehicles().await? <= 0 {
                return Ok(RunSummary { steps, reason: StopReason::Finished });
            }

            let started = Instant::now();
            let (sim_time, vehicles) = self.tick(steps).await?;
            steps += 1;
            self.metrics.record_step(started.elapsed().as_micros() as u64, sim_time, vehicles);
        }
    }

    /// One tick; returns (simulation time, vehicles handled)
    async fn tick(&mut self, step: u64) -> anyhow::Result<(f64, usize)> {
        let weather = self.weather.current().await;
        let sim_time = self.sim.simulation_time().await?;
        let vehicles = self.sim.vehicle_ids().await?;

        // Person count is global to the tick
        let pedestrians = !vehicles.is_empty() && self.sim.person_count().await? > 0;
        if pedestrians {
            self.metrics.record_pedestrian_tick();
        }

        for vehicle_id in &vehicles {
            let vehicle_type = self.sim.vehicle_type(vehicle_id).await?;
            let decision = decide(&vehicle_type, &weather);
            let phase = phase_for(&self.plan, decision, pedestrians);

            debug!(
                step = step,
                vehicle_id = %vehicle_id,
                vehicle_type = %vehicle_type,
                decision = decision.label(),
                phase = %phase,
                "vehicle_decision"
            );
            self.metrics.record_decision(vehicle_type.as_str(), decision);

            self.decisions.send(DecisionEvent {
                run: self.run_id,
                step,
                sim_time,
                vehicle_id: vehicle_id.clone(),
                vehicle_type,
                weather: weather.clone(),
                decision,
                phase,
                pedestrians,
                ts: chrono::Utc::now().timestamp_millis(),
            });

            self.sim.set_phase(&self.tls_id, phase).await?;
            self.metrics.record_phase_change();
        }

        self.sim.step().await?;
        Ok((sim_time, vehicles.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Decision, PhaseIndex, VehicleId, VehicleType, WeatherCondition};
    use crate::io::decision_channel::create_decision_channel;
    use crate::io::weather::StaticWeather;
    use anyhow::bail;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// What the scripted simulator observed
    #[derive(Debug, Default)]
    struct SimLog {
        phases: Vec<(String, PhaseIndex)>,
        /// Tick index of every person count query
        person_queries: Vec<usize>,
        steps: u64,
        closed: bool,
    }

    /// Simulator replaying one vehicle list (id, type) and person count per step
    struct ScriptedSim {
        ticks: Vec<(Vec<(&'static str, &'static str)>, i32)>,
        current: usize,
        fail_step_at: Option<u64>,
        log: Arc<Mutex<SimLog>>,
    }

    impl ScriptedSim {
        fn new(ticks: Vec<(Vec<(&'static str, &'static str)>, i32)>) -> (Self, Arc<Mutex<SimLog>>) {
            let log = Arc::new(Mutex::new(SimLog::default()));
            (Self { ticks, current: 0, fail_step_at: None, log: log.clone() }, log)
        }

        fn tick(&self) -> &(Vec<(&'static str, &'static str)>, i32) {
            &self.ticks[self.current]
        }
    }

    #[async_trait]
    impl SimulationControl for ScriptedSim {
        async fn min_expected_vehicles(&mut self) -> anyhow::Result<i32> {
            Ok((self.ticks.len() - self.current) as i32)
        }

        async fn simulation_time(&mut self) -> anyhow::Result<f64> {
            Ok(self.current as f64)
        }

        async fn vehicle_ids(&mut self) -> anyhow::Result<Vec<VehicleId>> {
            Ok(self.tick().0.iter().map(|(id, _)| VehicleId(id.to_string())).collect())
        }

        async fn vehicle_type(&mut self, id: &VehicleId) -> anyhow::Result<VehicleType> {
            match self.tick().0.iter().find(|(vid, _)| *vid == id.0) {
                Some((_, t)) => Ok(VehicleType::from(*t)),
                None => bail!("Vehicle '{}' is not known", id),
            }
        }

        async fn person_count(&mut self) -> anyhow::Result<i32> {
            self.log.lock().person_queries.push(self.current);
            Ok(self.tick().1)
        }

        async fn set_phase(&mut self, tls_id: &str, phase: PhaseIndex) -> anyhow::Result<()> {
            self.log.lock().phases.push((tls_id.to_string(), phase));
            Ok(())
        }

        async fn step(&mut self) -> anyhow::Result<()> {
            if self.fail_step_at == Some(self.current as u64) {
                bail!("connection reset");
            }
            self.current += 1;
            self.log.lock().steps += 1;
            Ok(())
        }

        async fn close(&mut self) -> anyhow::Result<()> {
            self.log.lock().closed = true;
            Ok(())
        }
    }

    struct Harness {
        control: ControlLoop<ScriptedSim>,
        log: Arc<Mutex<SimLog>>,
        rx: mpsc::Receiver<DecisionEvent>,
        metrics: Arc<Metrics>,
    }

    fn harness(
        config: &Config,
        sim: (ScriptedSim, Arc<Mutex<SimLog>>),
        weather: WeatherCondition,
    ) -> Harness {
        let metrics = Arc::new(Metrics::new());
        let weather =
            WeatherService::new(Box::new(StaticWeather(weather)), Duration::ZERO, metrics.clone());
        let (tx, rx) = create_decision_channel(256, metrics.clone());
        let (sim, log) = sim;
        let control = ControlLoop::new(config, sim, weather, tx, metrics.clone());
        Harness { control, log, rx, metrics }
    }

    fn drain(rx: &mut mpsc::Receiver<DecisionEvent>) -> Vec<DecisionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_runs_until_no_vehicles_expected() {
        let sim = ScriptedSim::new(vec![
            (vec![("veh0", "car")], 0),
            (vec![("veh0", "car"), ("ev1", "emergency")], 0),
            (vec![], 0),
        ]);
        let mut h = harness(&Config::default(), sim, WeatherCondition::Clear);
        let (_tx, shutdown) = watch::channel(false);

        let summary = h.control.run(shutdown).await.unwrap();
        assert_eq!(summary, RunSummary { steps: 3, reason: StopReason::Finished });

        let log = h.log.lock();
        assert_eq!(log.steps, 3);
        assert!(log.closed);
        assert_eq!(
            log.phases,
            vec![
                ("1".to_string(), PhaseIndex(1)),
                ("1".to_string(), PhaseIndex(1)),
                ("1".to_string(), PhaseIndex(0)),
            ]
        );
        drop(log);

        let events = drain(&mut h.rx);
        let decisions: Vec<_> = events.iter().map(|e| e.decision).collect();
        assert_eq!(
            decisions,
            vec![Decision::NormalFlow, Decision::NormalFlow, Decision::EmergencyPriority]
        );
        assert_eq!(events[2].step, 1);
        assert_eq!(h.metrics.steps_total(), 3);
    }

    #[tokio::test]
    async fn test_bad_weather_and_pedestrians() {
        let sim = ScriptedSim::new(vec![(vec![("veh0", "car")], 2), (vec![("veh1", "car")], 0)]);
        let mut h = harness(&Config::default(), sim, WeatherCondition::Rain);
        let (_tx, shutdown) = watch::channel(false);

        h.control.run(shutdown).await.unwrap();

        let events = drain(&mut h.rx);
        assert!(events.iter().all(|e| e.decision == Decision::BadWeatherExtension));
        assert_eq!(events[0].phase, PhaseIndex(2));
        assert!(events[0].pedestrians);
        assert_eq!(events[1].phase, PhaseIndex(1));
        assert_eq!(h.metrics.decisions(Decision::BadWeatherExtension), 2);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let ticks = (0..10).map(|_| (vec![("veh0", "car")], 0)).collect();
        let config = Config::default().with_max_steps(Some(4));
        let h = harness(&config, ScriptedSim::new(ticks), WeatherCondition::Clear);
        let (_tx, shutdown) = watch::channel(false);

        let summary = h.control.run(shutdown).await.unwrap();
        assert_eq!(summary, RunSummary { steps: 4, reason: StopReason::StepLimit });
        assert!(h.log.lock().closed);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let h = harness(
            &Config::default(),
            ScriptedSim::new(vec![(vec![("veh0", "car")], 0)]),
            WeatherCondition::Clear,
        );
        let (_tx, shutdown) = watch::channel(true);

        let summary = h.control.run(shutdown).await.unwrap();
        assert_eq!(summary, RunSummary { steps: 0, reason: StopReason::Shutdown });
        assert_eq!(h.log.lock().steps, 0);
        assert!(h.log.lock().closed);
    }

    #[tokio::test]
    async fn test_simulator_error_still_closes() {
        let (mut sim, log) =
            ScriptedSim::new(vec![(vec![("veh0", "car")], 0), (vec![("veh0", "car")], 0)]);
        sim.fail_step_at = Some(1);
        let h = harness(&Config::default(), (sim, log), WeatherCondition::Clear);
        let (_tx, shutdown) = watch::channel(false);

        let err = h.control.run(shutdown).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        let log = h.log.lock();
        assert_eq!(log.steps, 1);
        assert!(log.closed);
    }

    #[tokio::test]
    async fn test_custom_light_and_phases() {
        let config = Config::from_toml_str(
            "[traffic_light]\nid = \"J3\"\nemergency_phase = 4\nnormal_phase = 0\n",
        )
        .unwrap();
        let sim = ScriptedSim::new(vec![(vec![("ev0", "emergency"), ("veh1", "car")], 0)]);
        let h = harness(&config, sim, WeatherCondition::Clear);
        let (_tx, shutdown) = watch::channel(false);

        h.control.run(shutdown).await.unwrap();
        assert_eq!(
            h.log.lock().phases,
            vec![("J3".to_string(), PhaseIndex(4)), ("J3".to_string(), PhaseIndex(0))]
        );
    }

    #[tokio::test]
    async fn test_person_count_read_once_per_tick_with_vehicles() {
        let sim = ScriptedSim::new(vec![
            (vec![("veh0", "car"), ("ev1", "emergency"), ("veh2", "car")], 2),
            (vec![], 4),
            (vec![("veh0", "car"), ("veh2", "car")], 1),
        ]);
        let mut h = harness(&Config::default(), sim, WeatherCondition::Clear);
        let (_tx, shutdown) = watch::channel(false);

        h.control.run(shutdown).await.unwrap();
        assert_eq!(h.log.lock().person_queries, vec![0, 2]);

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.pedestrians));
        let phases: Vec<_> = events.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![PhaseIndex(2), PhaseIndex(0), PhaseIndex(2), PhaseIndex(2), PhaseIndex(2)]
        );
    }

    #[tokio::test]
    async fn test_signal_triggers_shutdown() {
        let (tx, rx) = watch::channel(false);
        shutdown_on_signal(std::future::ready(Ok(())), tx).await;
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_failed_signal_install_keeps_running() {
        let (tx, rx) = watch::channel(false);
        let failed = std::future::ready(Err(std::io::Error::other("no signal driver")));
        shutdown_on_signal(failed, tx).await;
        assert!(!*rx.borrow());
    }
}
