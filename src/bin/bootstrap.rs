//! Environment bootstrap
//!
//! Installs the simulator if it is missing, writes the input files for the
//! selected scenario, builds the network and optionally opens the GUI.
//!
//! Usage:
//!   traffic-bootstrap --scenario medium --launch
//!   traffic-bootstrap                      # prompts for the scenario

use clap::Parser;
use std::str::FromStr;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use traffic_control::domain::Scenario;
use traffic_control::infra::Config;
use traffic_control::io::SystemRunner;
use traffic_control::services::bootstrap::prompt_scenario;
use traffic_control::services::Bootstrap;

/// Prepare a simulation scenario
#[derive(Parser, Debug)]
#[command(name = "traffic-bootstrap", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Scenario to generate: best, medium or worst (prompted if omitted)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Fail instead of installing missing simulator packages
    #[arg(long)]
    skip_install: bool,

    /// Open the scenario in the GUI simulator once generated
    #[arg(long)]
    launch: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "traffic-bootstrap starting");

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };

    let scenario = match &args.scenario {
        Some(name) => Scenario::from_str(name)?,
        None => {
            prompt_scenario(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?
        }
    };
    info!(
        config_file = %config.config_file(),
        scenario = %scenario,
        vehicles = config.scenario_vehicle_count(scenario),
        output_dir = %config.scenario_output_dir(),
        "scenario_selected"
    );

    let bootstrap = Bootstrap::new(config, SystemRunner);
    let status = bootstrap.ensure_simulator(args.skip_install).await?;
    info!(status = ?status, "simulator_checked");

    let paths = bootstrap.generate(scenario).await?;

    if args.launch {
        info!(config = %paths.config.display(), "gui_launching");
        bootstrap.launch_gui(&paths).await?;
    } else {
        info!(config = %paths.config.display(), "scenario_ready");
    }
    Ok(())
}
