//! TraCI client for driving a SUMO simulation over TCP
//!
//! - `codec` - command framing and response parsing
//! - `TraciClient` - request/response exchange over any async byte stream
//! - `Simulation` - a launched simulator process plus its client

pub mod codec;

use crate::domain::types::{PhaseIndex, VehicleId, VehicleType};
use crate::infra::config::Config;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use codec::*;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command as ProcessCommand};
use tracing::{debug, info, warn};

/// Operations the control loop needs from the simulator
#[async_trait]
pub trait SimulationControl: Send {
    /// Vehicles running plus those still waiting to depart
    async fn min_expected_vehicles(&mut self) -> anyhow::Result<i32>;
    /// Current simulation time in seconds
    async fn simulation_time(&mut self) -> anyhow::Result<f64>;
    async fn vehicle_ids(&mut self) -> anyhow::Result<Vec<VehicleId>>;
    async fn vehicle_type(&mut self, id: &VehicleId) -> anyhow::Result<VehicleType>;
    async fn person_count(&mut self) -> anyhow::Result<i32>;
    async fn set_phase(&mut self, tls_id: &str, phase: PhaseIndex) -> anyhow::Result<()>;
    /// Advance by one simulation step
    async fn step(&mut self) -> anyhow::Result<()>;
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// TraCI protocol client over a connected stream
pub struct TraciClient<S = TcpStream> {
    stream: S,
    read_timeout: Duration,
}

impl TraciClient<TcpStream> {
    /// Connect to a simulator listening on `addr`, retrying while it starts
    pub async fn connect(
        addr: &str,
        retries: u32,
        retry_delay: Duration,
        read_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut attempt = 0u32;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!(addr = %addr, attempt = attempt, "traci_connected");
                    return Ok(Self::new(stream, read_timeout));
                }
                Err(e) if attempt < retries => {
                    debug!(addr = %addr, attempt = attempt, error = %e, "traci_connect_retry");
                    attempt += 1;
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to connect to simulator at {} after {} retries", addr, retries)
                    })
                }
            }
        }
    }
}

impl<S> TraciClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self { stream, read_timeout }
    }

    async fn read_message(&mut self) -> anyhow::Result<Bytes> {
        let total = self.stream.read_u32().await.context("traci read failed")? as usize;
        if !(4..=MAX_MESSAGE_LEN).contains(&total) {
            bail!("invalid traci message length {}", total);
        }
        let mut body = vec![0u8; total - 4];
        self.stream.read_exact(&mut body).await.context("traci read failed")?;
        Ok(Bytes::from(body))
    }

    /// Send one command and return the response positioned after its status
    async fn exchange(&mut self, cmd: Command) -> anyhow::Result<Reader> {
        let msg = encode_message(std::slice::from_ref(&cmd));
        self.stream.write_all(&msg).await.context("traci write failed")?;

        let body = tokio::time::timeout(self.read_timeout, self.read_message())
            .await
            .map_err(|_| anyhow!("traci response to 0x{:02X} timed out", cmd.id()))??;

        let mut reader = Reader::new(body);
        reader.read_status(cmd.id())?;
        Ok(reader)
    }

    async fn get(&mut self, domain: u8, variable: u8, object_id: &str) -> anyhow::Result<(u8, Reader)> {
        let mut reader = self.exchange(Command::get(domain, variable, object_id)).await?;
        let ty = reader.read_get_response(domain, variable)?;
        Ok((ty, reader))
    }

    pub async fn get_int(&mut self, domain: u8, variable: u8, object_id: &str) -> anyhow::Result<i32> {
        let (ty, mut reader) = self.get(domain, variable, object_id).await?;
        expect_type(ty, TYPE_INTEGER)?;
        reader.read_i32()
    }

    pub async fn get_double(&mut self, domain: u8, variable: u8, object_id: &str) -> anyhow::Result<f64> {
        let (ty, mut reader) = self.get(domain, variable, object_id).await?;
        expect_type(ty, TYPE_DOUBLE)?;
        reader.read_f64()
    }

    pub async fn get_string(&mut self, domain: u8, variable: u8, object_id: &str) -> anyhow::Result<String> {
        let (ty, mut reader) = self.get(domain, variable, object_id).await?;
        expect_type(ty, TYPE_STRING)?;
        reader.read_string()
    }

    pub async fn get_string_list(
        &mut self,
        domain: u8,
        variable: u8,
        object_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        let (ty, mut reader) = self.get(domain, variable, object_id).await?;
        expect_type(ty, TYPE_STRINGLIST)?;
        reader.read_string_list()
    }

    /// Returns (API version, simulator version string)
    pub async fn get_version(&mut self) -> anyhow::Result<(i32, String)> {
        let mut reader = self.exchange(Command::new(CMD_GETVERSION)).await?;
        let (id, _) = reader.read_command_header()?;
        if id != CMD_GETVERSION {
            bail!("traci version response 0x{:02X}", id);
        }
        let api = reader.read_i32()?;
        let version = reader.read_string()?;
        Ok((api, version))
    }
}

#[async_trait]
impl<S> SimulationControl for TraciClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn min_expected_vehicles(&mut self) -> anyhow::Result<i32> {
        self.get_int(CMD_GET_SIM_VARIABLE, VAR_MIN_EXPECTED_VEHICLES, "").await
    }

    async fn simulation_time(&mut self) -> anyhow::Result<f64> {
        self.get_double(CMD_GET_SIM_VARIABLE, VAR_TIME, "").await
    }

    async fn vehicle_ids(&mut self) -> anyhow::Result<Vec<VehicleId>> {
        let ids = self.get_string_list(CMD_GET_VEHICLE_VARIABLE, VAR_ID_LIST, "").await?;
        Ok(ids.into_iter().map(VehicleId).collect())
    }

    async fn vehicle_type(&mut self, id: &VehicleId) -> anyhow::Result<VehicleType> {
        let t = self.get_string(CMD_GET_VEHICLE_VARIABLE, VAR_TYPE, &id.0).await?;
        Ok(VehicleType(t))
    }

    async fn person_count(&mut self) -> anyhow::Result<i32> {
        self.get_int(CMD_GET_PERSON_VARIABLE, VAR_ID_COUNT, "").await
    }

    async fn set_phase(&mut self, tls_id: &str, phase: PhaseIndex) -> anyhow::Result<()> {
        self.exchange(Command::set_int(CMD_SET_TL_VARIABLE, TL_PHASE_INDEX, tls_id, phase.0))
            .await
            .with_context(|| format!("Failed to set phase {} on traffic light {}", phase, tls_id))?;
        Ok(())
    }

    async fn step(&mut self) -> anyhow::Result<()> {
        // Target time 0 advances by exactly one step
        let mut reader = self.exchange(Command::new(CMD_SIMSTEP).f64(0.0)).await?;
        let subscriptions = reader.read_i32()?;
        if subscriptions != 0 {
            debug!(count = subscriptions, "traci_unexpected_subscription_results");
        }
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.exchange(Command::new(CMD_CLOSE)).await?;
        self.stream.shutdown().await.ok();
        Ok(())
    }
}

/// Pick a free local port for the simulator's TraCI server
fn free_local_port() -> anyhow::Result<u16> {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").context("Failed to find a free port")?;
    Ok(listener.local_addr()?.port())
}

/// Simulator command line for `config`
pub fn launch_args(config: &Config, port: u16) -> Vec<String> {
    let mut args = vec![
        "-c".to_string(),
        config.sim_config_file().to_string(),
        "--remote-port".to_string(),
        port.to_string(),
    ];
    if config.sim_gui() {
        // The GUI otherwise waits for the user to press play
        args.push("--start".to_string());
        args.push("--quit-on-end".to_string());
    }
    args
}

/// A simulator session: the TraCI connection and, if we spawned it, the
/// simulator process
pub struct Simulation {
    client: TraciClient,
    child: Option<Child>,
}

impl Simulation {
    /// Launch the simulator (unless configured to attach) and connect to it
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let (port, child) = if config.sim_launch() {
            let port = if config.sim_port() == 0 { free_local_port()? } else { config.sim_port() };
            let args = launch_args(config, port);
            info!(binary = %config.sim_binary(), args = ?args, "simulator_launching");

            let child = ProcessCommand::new(config.sim_binary())
                .args(&args)
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Failed to launch {}", config.sim_binary()))?;
            (port, Some(child))
        } else {
            (config.sim_port(), None)
        };

        let addr = format!("{}:{}", config.sim_host(), port);
        let mut client = TraciClient::connect(
            &addr,
            config.sim_connect_retries(),
            config.sim_connect_retry_delay(),
            config.sim_read_timeout(),
        )
        .await?;

        let (api, version) = client.get_version().await?;
        info!(api_version = api, version = %version, "simulator_ready");

        Ok(Self { client, child })
    }
}

#[async_trait]
impl SimulationControl for Simulation {
    async fn min_expected_vehicles(&mut self) -> anyhow::Result<i32> {
        self.client.min_expected_vehicles().await
    }

    async fn simulation_time(&mut self) -> anyhow::Result<f64> {
        self.client.simulation_time().await
    }

    async fn vehicle_ids(&mut self) -> anyhow::Result<Vec<VehicleId>> {
        self.client.vehicle_ids().await
    }

    async fn vehicle_type(&mut self, id: &VehicleId) -> anyhow::Result<VehicleType> {
        self.client.vehicle_type(id).await
    }

    async fn person_count(&mut self) -> anyhow::Result<i32> {
        self.client.person_count().await
    }

    async fn set_phase(&mut self, tls_id: &str, phase: PhaseIndex) -> anyhow::Result<()> {
        self.client.set_phase(tls_id, phase).await
    }

    async fn step(&mut self) -> anyhow::Result<()> {
        self.client.step().await
    }

    /// Close the connection, then give the simulator a moment to exit
    async fn close(&mut self) -> anyhow::Result<()> {
        let result = self.client.close().await;
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => info!(status = %status, "simulator_exited"),
                Ok(Err(e)) => warn!(error = %e, "simulator_wait_failed"),
                Err(_) => {
                    warn!("simulator_exit_timeout_killing");
                    child.kill().await.ok();
                }
            }
        }
        result
    }
}
