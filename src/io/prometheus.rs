//! Prometheus metrics HTTP endpoint
//!
//! Exposes controller metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

fn write_decisions(output: &mut String, summary: &MetricsSummary) {
    let name = "traffic_decisions_total";
    let _ = writeln!(output, "# HELP {name} Decisions made, by kind");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in [
        ("emergency", summary.decisions_emergency),
        ("bad_weather", summary.decisions_bad_weather),
        ("normal", summary.decisions_normal),
    ] {
        let _ = writeln!(output, "{name}{{kind=\"{kind}\"}} {val}");
    }
}

fn write_vehicle_types(output: &mut String, metrics: &Metrics) {
    let name = "traffic_vehicle_decisions_total";
    let _ = writeln!(output, "# HELP {name} Decisions made, by simulator vehicle type");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (vtype, val) in metrics.vehicle_type_counts() {
        let _ = writeln!(output, "{name}{{vehicle_type=\"{vtype}\"}} {val}");
    }
}

fn write_tick_histogram(output: &mut String, summary: &MetricsSummary) {
    let name = "traffic_tick_latency_us";
    let _ = writeln!(output, "# HELP {name} Wall time per control tick");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let buckets = &summary.tick_lat_total_buckets;
    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum {}", summary.tick_lat_total_sum_us);
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format. Scrapes never reset
/// anything, so the log reporter keeps its own latency window.
fn format_prometheus_metrics(metrics: &Metrics) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "traffic_steps_total",
        "Simulation steps taken",
        MetricType::Counter,
        summary.steps_total,
    );
    write_metric(
        &mut output,
        "traffic_active_vehicles",
        "Vehicles in the simulation at the last step",
        MetricType::Gauge,
        summary.active_vehicles,
    );
    let _ = writeln!(output, "# HELP traffic_sim_time_seconds Simulation clock");
    let _ = writeln!(output, "# TYPE traffic_sim_time_seconds gauge");
    let _ = writeln!(output, "traffic_sim_time_seconds {:.3}", summary.sim_time);
    write_decisions(&mut output, &summary);
    write_vehicle_types(&mut output, metrics);
    write_metric(
        &mut output,
        "traffic_phase_changes_total",
        "Traffic light phase writes",
        MetricType::Counter,
        summary.phase_changes,
    );
    write_metric(
        &mut output,
        "traffic_pedestrian_ticks_total",
        "Ticks with pedestrians present",
        MetricType::Counter,
        summary.pedestrian_ticks,
    );
    write_metric(
        &mut output,
        "traffic_weather_fetches_total",
        "Weather lookups attempted",
        MetricType::Counter,
        summary.weather_fetches,
    );
    write_metric(
        &mut output,
        "traffic_weather_failures_total",
        "Weather lookups that failed",
        MetricType::Counter,
        summary.weather_failures,
    );
    write_metric(
        &mut output,
        "traffic_mqtt_published_total",
        "MQTT messages handed to the client",
        MetricType::Counter,
        summary.decisions_published,
    );
    write_metric(
        &mut output,
        "traffic_mqtt_publish_failures_total",
        "MQTT publish calls that failed",
        MetricType::Counter,
        summary.publish_failures,
    );
    write_metric(
        &mut output,
        "traffic_decisions_dropped_total",
        "Decisions dropped because the publish queue was full",
        MetricType::Counter,
        summary.decisions_dropped,
    );
    write_tick_histogram(&mut output, &summary);

    output
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(format_prometheus_metrics(&metrics)))),
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from_static(b"ok"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"Not Found"))),
    };
    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Serve metrics until shutdown
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Decision;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_step(300, 12.0, 3);
        metrics.record_decision("car", Decision::NormalFlow);
        metrics.record_decision("emergency", Decision::EmergencyPriority);
        metrics.record_phase_change();

        let output = format_prometheus_metrics(&metrics);

        assert!(output.contains("traffic_steps_total 1"));
        assert!(output.contains("traffic_active_vehicles 3"));
        assert!(output.contains("traffic_decisions_total{kind=\"emergency\"} 1"));
        assert!(output.contains("traffic_decisions_total{kind=\"normal\"} 1"));
        assert!(output.contains("traffic_vehicle_decisions_total{vehicle_type=\"car\"} 1"));
        assert!(output.contains("traffic_tick_latency_us_bucket{le=\"500\"} 1"));
        assert!(output.contains("traffic_tick_latency_us_count 1"));
        assert!(output.contains("traffic_sim_time_seconds 12.000"));
    }

    #[test]
    fn test_histogram_is_cumulative_across_scrapes_and_reports() {
        let metrics = Metrics::new();
        metrics.record_step(300, 1.0, 1);
        metrics.record_step(700, 2.0, 1);

        let first = format_prometheus_metrics(&metrics);
        assert!(first.contains("traffic_tick_latency_us_count 2"));
        assert!(first.contains("traffic_tick_latency_us_sum 1000"));

        // the log reporter resetting its window must not move the export
        metrics.report();
        metrics.record_step(100, 3.0, 1);
        let second = format_prometheus_metrics(&metrics);
        assert!(second.contains("traffic_tick_latency_us_bucket{le=\"500\"} 2"));
        assert!(second.contains("traffic_tick_latency_us_count 3"));
        assert!(second.contains("traffic_tick_latency_us_sum 1100"));

        // and scraping does not steal the reporter's window
        assert_eq!(metrics.report().tick_lat_buckets.iter().sum::<u64>(), 1);
    }
}
