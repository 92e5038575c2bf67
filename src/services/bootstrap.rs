//! Environment bootstrap: simulator packages, scenario files, GUI launch

use crate::domain::scenario::{
    Scenario, ScenarioFiles, ScenarioPaths, CONFIG_FILE, EDGES_FILE, NET_FILE, NODES_FILE,
};
use crate::infra::config::Config;
use crate::io::process::CommandRunner;
use anyhow::{bail, Context};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

const SCENARIO_PROMPT: &[u8] = b"Select scenario [best/medium/worst]: ";

/// Prompt on `output` until `input` yields a valid scenario name. Running out
/// of input first is an error.
pub async fn prompt_scenario<R, W>(input: R, mut output: W) -> anyhow::Result<Scenario>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(SCENARIO_PROMPT).await?;
        output.flush().await?;

        let line = lines
            .next_line()
            .await?
            .context("input closed before a scenario was selected")?;
        match Scenario::from_str(&line) {
            Ok(scenario) => return Ok(scenario),
            Err(e) => warn!(input = %line.trim(), error = %e, "scenario_invalid"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorStatus {
    AlreadyInstalled,
    Installed,
}

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(program: &str, args: Vec<String>) -> Self {
        Self { program: program.to_string(), args }
    }

    fn with_sudo(self, sudo: bool) -> Self {
        if !sudo {
            return self;
        }
        let mut args = vec![self.program];
        args.extend(self.args);
        Self { program: "sudo".to_string(), args }
    }
}

pub struct Bootstrap<R: CommandRunner> {
    config: Config,
    runner: R,
}

impl<R: CommandRunner> Bootstrap<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    /// Package manager invocations that install the simulator
    pub fn install_commands(&self) -> Vec<Invocation> {
        let pm = self.config.package_manager();
        let packages = self.config.packages().iter().cloned();
        let sudo = self.config.use_sudo();

        let tool = Path::new(pm).file_name().and_then(|n| n.to_str()).unwrap_or(pm);
        let mut commands = Vec::new();
        match tool {
            "apt-get" | "apt" => {
                commands.push(Invocation::new(pm, vec!["update".to_string()]));
                let mut args = vec!["install".to_string(), "-y".to_string()];
                args.extend(packages);
                commands.push(Invocation::new(pm, args));
            }
            "dnf" | "yum" => {
                let mut args = vec!["install".to_string(), "-y".to_string()];
                args.extend(packages);
                commands.push(Invocation::new(pm, args));
            }
            _ => {
                let mut args = vec!["install".to_string()];
                args.extend(packages);
                commands.push(Invocation::new(pm, args));
            }
        }
        commands.into_iter().map(|c| c.with_sudo(sudo)).collect()
    }

    fn missing_tools(&self) -> Vec<&str> {
        [self.config.sim_binary(), self.config.netconvert_binary()]
            .into_iter()
            .filter(|tool| !self.runner.is_available(tool))
            .collect()
    }

    /// Make sure the simulator and its tools are on PATH, installing the
    /// configured packages if allowed
    pub async fn ensure_simulator(&self, skip_install: bool) -> anyhow::Result<SimulatorStatus> {
        let missing = self.missing_tools();
        if missing.is_empty() {
            info!("simulator_already_installed");
            return Ok(SimulatorStatus::AlreadyInstalled);
        }
        if skip_install || !self.config.install_packages() {
            bail!("{} not found on PATH and package installation is disabled", missing.join(", "));
        }

        info!(missing = ?missing, packages = ?self.config.packages(), "simulator_installing");
        for cmd in self.install_commands() {
            self.runner.run(&cmd.program, &cmd.args, None).await?;
        }

        let missing = self.missing_tools();
        if !missing.is_empty() {
            bail!("{} still not found on PATH after installation", missing.join(", "));
        }
        Ok(SimulatorStatus::Installed)
    }

    /// Write the scenario's input files and build the network with netconvert
    pub async fn generate(&self, scenario: Scenario) -> anyhow::Result<ScenarioPaths> {
        let params = self.config.scenario_params(scenario);
        let dir = Path::new(self.config.scenario_output_dir());
        let paths = ScenarioFiles::render(&params).write_to(dir)?;
        info!(
            scenario = %scenario,
            vehicles = params.vehicle_count,
            dir = %paths.dir.display(),
            "scenario_files_written"
        );

        let args = vec![
            "--node-files".to_string(),
            NODES_FILE.to_string(),
            "--edge-files".to_string(),
            EDGES_FILE.to_string(),
            "--output-file".to_string(),
            NET_FILE.to_string(),
        ];
        self.runner.run(self.config.netconvert_binary(), &args, Some(&paths.dir)).await?;
        info!(net = %paths.net.display(), "network_built");
        Ok(paths)
    }

    /// Open the scenario in the GUI simulator and wait for it to close
    pub async fn launch_gui(&self, paths: &ScenarioPaths) -> anyhow::Result<()> {
        let args = vec!["-c".to_string(), CONFIG_FILE.to_string()];
        self.runner.run(self.config.sim_gui_binary(), &args, Some(&paths.dir)).await
    }
}
