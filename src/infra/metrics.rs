//! Lock-free metrics collection and periodic reporting
//!
//! Counters are atomics updated from the control loop and the MQTT
//! publisher. Reporting reads them without resetting, except the windowed
//! tick latency histogram which the log reporter swaps per window. The
//! cumulative histogram behind the Prometheus export only grows.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical counters
//! only and must not drive control decisions.

use crate::domain::types::Decision;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential tick latency bucket bounds (microseconds)
/// Buckets: ≤500, ≤1000, ≤2000, ≤4000, ≤8000, ≤16000, ≤32000, ≤64000, ≤128000, ≤256000, >256000
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [500, 1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Upper bound of the bucket containing `percentile`
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }
    let target = ((total as f64) * percentile).ceil() as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return METRICS_BUCKET_BOUNDS
                .get(i)
                .copied()
                .unwrap_or(METRICS_BUCKET_BOUNDS[METRICS_BUCKET_BOUNDS.len() - 1] * 2);
        }
    }
    METRICS_BUCKET_BOUNDS[METRICS_BUCKET_BOUNDS.len() - 1] * 2
}

pub struct Metrics {
    started_at: Instant,
    steps_total: AtomicU64,
    vehicles_processed: AtomicU64,
    decisions_emergency: AtomicU64,
    decisions_bad_weather: AtomicU64,
    decisions_normal: AtomicU64,
    phase_changes: AtomicU64,
    pedestrian_ticks: AtomicU64,
    active_vehicles: AtomicU64,
    /// f64 bits
    sim_time: AtomicU64,
    weather_fetches: AtomicU64,
    weather_failures: AtomicU64,
    decisions_published: AtomicU64,
    publish_failures: AtomicU64,
    decisions_dropped: AtomicU64,
    tick_lat_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    tick_lat_sum_us: AtomicU64,
    tick_lat_max_us: AtomicU64,
    tick_lat_total_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    tick_lat_total_sum_us: AtomicU64,
    vehicle_types: Mutex<FxHashMap<String, u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            steps_total: AtomicU64::new(0),
            vehicles_processed: AtomicU64::new(0),
            decisions_emergency: AtomicU64::new(0),
            decisions_bad_weather: AtomicU64::new(0),
            decisions_normal: AtomicU64::new(0),
            phase_changes: AtomicU64::new(0),
            pedestrian_ticks: AtomicU64::new(0),
            active_vehicles: AtomicU64::new(0),
            sim_time: AtomicU64::new(0f64.to_bits()),
            weather_fetches: AtomicU64::new(0),
            weather_failures: AtomicU64::new(0),
            decisions_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            decisions_dropped: AtomicU64::new(0),
            tick_lat_buckets: Default::default(),
            tick_lat_sum_us: AtomicU64::new(0),
            tick_lat_max_us: AtomicU64::new(0),
            tick_lat_total_buckets: Default::default(),
            tick_lat_total_sum_us: AtomicU64::new(0),
            vehicle_types: Mutex::new(FxHashMap::default()),
        }
    }

    /// Record a completed tick (all vehicles handled and the step taken)
    pub fn record_step(&self, latency_us: u64, sim_time: f64, active_vehicles: usize) {
        self.steps_total.fetch_add(1, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.tick_lat_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.tick_lat_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.tick_lat_total_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.tick_lat_total_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.tick_lat_max_us, latency_us);
        self.sim_time.store(sim_time.to_bits(), Ordering::Relaxed);
        self.active_vehicles.store(active_vehicles as u64, Ordering::Relaxed);
    }

    pub fn record_decision(&self, vehicle_type: &str, decision: Decision) {
        self.vehicles_processed.fetch_add(1, Ordering::Relaxed);
        let counter = match decision {
            Decision::EmergencyPriority => &self.decisions_emergency,
            Decision::BadWeatherExtension => &self.decisions_bad_weather,
            Decision::NormalFlow => &self.decisions_normal,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut types = self.vehicle_types.lock();
        if let Some(count) = types.get_mut(vehicle_type) {
            *count += 1;
        } else {
            types.insert(vehicle_type.to_string(), 1);
        }
    }

    pub fn record_phase_change(&self) {
        self.phase_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pedestrian_tick(&self) {
        self.pedestrian_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_weather_fetch(&self, ok: bool) {
        self.weather_fetches.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.weather_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_published(&self) {
        self.decisions_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision_dropped(&self) {
        self.decisions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn steps_total(&self) -> u64 {
        self.steps_total.load(Ordering::Relaxed)
    }

    pub fn decisions(&self, decision: Decision) -> u64 {
        match decision {
            Decision::EmergencyPriority => self.decisions_emergency.load(Ordering::Relaxed),
            Decision::BadWeatherExtension => self.decisions_bad_weather.load(Ordering::Relaxed),
            Decision::NormalFlow => self.decisions_normal.load(Ordering::Relaxed),
        }
    }

    pub fn decisions_dropped(&self) -> u64 {
        self.decisions_dropped.load(Ordering::Relaxed)
    }

    pub fn weather_failures(&self) -> u64 {
        self.weather_failures.load(Ordering::Relaxed)
    }

    /// Per vehicle type decision counts, sorted by type
    pub fn vehicle_type_counts(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<_> =
            self.vehicle_types.lock().iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort();
        counts
    }

    /// Snapshot all counters and start a new tick latency window
    pub fn report(&self) -> MetricsSummary {
        self.summary(true)
    }

    /// Snapshot all counters, leaving the latency window untouched
    pub fn snapshot(&self) -> MetricsSummary {
        self.summary(false)
    }

    fn summary(&self, reset_window: bool) -> MetricsSummary {
        let mut tick_lat_buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.tick_lat_buckets.iter().enumerate() {
            tick_lat_buckets[i] = if reset_window {
                bucket.swap(0, Ordering::Relaxed)
            } else {
                bucket.load(Ordering::Relaxed)
            };
        }
        let mut tick_lat_total_buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.tick_lat_total_buckets.iter().enumerate() {
            tick_lat_total_buckets[i] = bucket.load(Ordering::Relaxed);
        }
        let window_ticks: u64 = tick_lat_buckets.iter().sum();
        let lat_sum = if reset_window {
            self.tick_lat_sum_us.swap(0, Ordering::Relaxed)
        } else {
            self.tick_lat_sum_us.load(Ordering::Relaxed)
        };
        let steps_total = self.steps_total.load(Ordering::Relaxed);
        let uptime_secs = self.started_at.elapsed().as_secs_f64();

        MetricsSummary {
            steps_total,
            steps_per_sec: if uptime_secs > 0.0 { steps_total as f64 / uptime_secs } else { 0.0 },
            sim_time: f64::from_bits(self.sim_time.load(Ordering::Relaxed)),
            active_vehicles: self.active_vehicles.load(Ordering::Relaxed),
            vehicles_processed: self.vehicles_processed.load(Ordering::Relaxed),
            decisions_emergency: self.decisions_emergency.load(Ordering::Relaxed),
            decisions_bad_weather: self.decisions_bad_weather.load(Ordering::Relaxed),
            decisions_normal: self.decisions_normal.load(Ordering::Relaxed),
            phase_changes: self.phase_changes.load(Ordering::Relaxed),
            pedestrian_ticks: self.pedestrian_ticks.load(Ordering::Relaxed),
            weather_fetches: self.weather_fetches.load(Ordering::Relaxed),
            weather_failures: self.weather_failures.load(Ordering::Relaxed),
            decisions_published: self.decisions_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            decisions_dropped: self.decisions_dropped.load(Ordering::Relaxed),
            tick_lat_avg_us: if window_ticks > 0 { lat_sum / window_ticks } else { 0 },
            tick_lat_max_us: self.tick_lat_max_us.load(Ordering::Relaxed),
            tick_lat_p50_us: percentile_from_buckets(&tick_lat_buckets, 0.50),
            tick_lat_p99_us: percentile_from_buckets(&tick_lat_buckets, 0.99),
            tick_lat_buckets,
            tick_lat_total_buckets,
            tick_lat_total_sum_us: self.tick_lat_total_sum_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub steps_total: u64,
    pub steps_per_sec: f64,
    pub sim_time: f64,
    pub active_vehicles: u64,
    pub vehicles_processed: u64,
    pub decisions_emergency: u64,
    pub decisions_bad_weather: u64,
    pub decisions_normal: u64,
    pub phase_changes: u64,
    pub pedestrian_ticks: u64,
    pub weather_fetches: u64,
    pub weather_failures: u64,
    pub decisions_published: u64,
    pub publish_failures: u64,
    pub decisions_dropped: u64,
    pub tick_lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub tick_lat_avg_us: u64,
    pub tick_lat_max_us: u64,
    pub tick_lat_p50_us: u64,
    pub tick_lat_p99_us: u64,
    /// Since start; never reset
    pub tick_lat_total_buckets: [u64; METRICS_NUM_BUCKETS],
    pub tick_lat_total_sum_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            steps_total = %self.steps_total,
            steps_per_sec = format!("{:.1}", self.steps_per_sec),
            sim_time = format!("{:.1}", self.sim_time),
            active_vehicles = %self.active_vehicles,
            emergency = %self.decisions_emergency,
            bad_weather = %self.decisions_bad_weather,
            normal = %self.decisions_normal,
            published = %self.decisions_published,
            dropped = %self.decisions_dropped,
            publish_failures = %self.publish_failures,
            weather_failures = %self.weather_failures,
            tick_p50_us = %self.tick_lat_p50_us,
            tick_p99_us = %self.tick_lat_p99_us,
            "metrics"
        );
    }
}
