//! Traffic control - adaptive signal control for a simulated intersection
//!
//! Steps a traffic simulation over TraCI, decides per vehicle whether to give
//! priority to emergency vehicles or extend green for bad weather, drives the
//! traffic light accordingly and publishes every decision over MQTT.
//!
//! Module structure:
//! - `domain/` - Core types (vehicles, weather, decisions, scenarios)
//! - `io/` - External interfaces (TraCI, weather API, MQTT, processes)
//! - `services/` - Control loop and environment bootstrap
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use traffic_control::infra::{Config, Metrics};
use traffic_control::io::mqtt_egress::FLUSH_TIMEOUT;
use traffic_control::io::{create_decision_channel, DecisionPublisher, Simulation, WeatherService};
use traffic_control::services::{shutdown_on_signal, ControlLoop};

/// Traffic control - emergency and weather aware signal control
#[derive(Parser, Debug)]
#[command(name = "traffic-control", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Stop after this many simulation steps
    #[arg(long)]
    max_steps: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "traffic-control starting");

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    }
    .with_max_steps(args.max_steps);

    if let Err(e) = traffic_control::infra::broker::start_embedded_broker(&config) {
        error!(error = %format!("{:#}", e), "mqtt_broker_start_failed");
    }

    info!(
        config_file = %config.config_file(),
        simulator = %config.sim_binary(),
        sumo_config = %config.sim_config_file(),
        tls_id = %config.tls_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        weather_enabled = %config.weather_enabled(),
        weather_city = %config.weather_city(),
        max_steps = ?config.max_steps(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = traffic_control::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let (decisions, decision_rx) = create_decision_channel(config.mqtt_queue_size(), metrics.clone());
    let publisher = DecisionPublisher::new(&config, decision_rx, metrics.clone());
    let publisher_shutdown = shutdown_rx.clone();
    let publisher = tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    tokio::spawn(shutdown_on_signal(tokio::signal::ctrl_c(), shutdown_tx.clone()));

    let weather = WeatherService::from_config(&config, metrics.clone())?;
    let sim = Simulation::start(&config).await?;
    let control = ControlLoop::new(&config, sim, weather, decisions, metrics.clone());
    let result = control.run(shutdown_rx).await;

    // Control loop owned the only sender; the publisher drains and disconnects
    match tokio::time::timeout(FLUSH_TIMEOUT * 2, publisher).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "mqtt_publisher_task_failed"),
        Err(_) => warn!("mqtt_publisher_shutdown_timeout"),
    }
    reporter.abort();
    metrics.report().log();
    let _ = shutdown_tx.send(true);

    let summary = result?;
    info!(steps = summary.steps, reason = ?summary.reason, "traffic-control shutdown complete");
    Ok(())
}
