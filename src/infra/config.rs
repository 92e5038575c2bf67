//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take the defaults of
//! a stock deployment (public mosquitto broker, New York weather,
//! traffic light "1").

use crate::domain::policy::PhasePlan;
use crate::domain::scenario::{Scenario, ScenarioParams};
use crate::domain::types::PhaseIndex;
use anyhow::Context;
use rumqttc::QoS;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Headless simulator binary
    pub binary: String,
    /// GUI simulator binary
    pub gui_binary: String,
    /// Run the GUI binary instead of the headless one
    pub gui: bool,
    /// Simulator configuration (.sumocfg)
    pub config_file: String,
    /// Spawn the simulator; when false, attach to one already listening
    pub launch: bool,
    pub host: String,
    pub port: u16,
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    pub read_timeout_ms: u64,
    /// Stop after this many steps even if vehicles remain
    pub max_steps: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            binary: "sumo".to_string(),
            gui_binary: "sumo-gui".to_string(),
            gui: false,
            config_file: "sumo_config.sumocfg".to_string(),
            launch: true,
            host: "127.0.0.1".to_string(),
            port: 8813,
            connect_retries: 50,
            connect_retry_delay_ms: 200,
            read_timeout_ms: 30_000,
            max_steps: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrafficLightConfig {
    pub id: String,
    pub emergency_phase: i32,
    pub normal_phase: i32,
    pub pedestrian_phase: i32,
}

impl Default for TrafficLightConfig {
    fn default() -> Self {
        Self { id: "1".to_string(), emergency_phase: 0, normal_phase: 1, pedestrian_phase: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic receiving the plain decision string
    pub topic: String,
    /// Optional topic receiving full JSON decision events
    pub events_topic: Option<String>,
    /// 0, 1 or 2
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub queue_size: usize,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            client_id: "TrafficSystem".to_string(),
            topic: "traffic/priority".to_string(),
            events_topic: None,
            qos: 0,
            keep_alive_secs: 30,
            queue_size: 1000,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub city: String,
    /// How long a fetched condition stays valid (0 = fetch every tick)
    pub refresh_secs: u64,
    pub timeout_ms: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://api.openweathermap.org/data/2.5/weather".to_string(),
            api_key: "your_openweather_api_key".to_string(),
            city: "New York".to_string(),
            refresh_secs: 60,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub output_dir: String,
    pub best_vehicles: u32,
    pub medium_vehicles: u32,
    pub worst_vehicles: u32,
    pub headway_secs: f64,
    pub emergency_every: u32,
    pub pedestrian_every: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            best_vehicles: Scenario::Best.default_vehicle_count(),
            medium_vehicles: Scenario::Medium.default_vehicle_count(),
            worst_vehicles: Scenario::Worst.default_vehicle_count(),
            headway_secs: 2.0,
            emergency_every: 10,
            pedestrian_every: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub install_packages: bool,
    pub package_manager: String,
    pub packages: Vec<String>,
    pub use_sudo: bool,
    pub netconvert: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            install_packages: true,
            package_manager: "apt-get".to_string(),
            packages: vec!["sumo".to_string(), "sumo-tools".to_string(), "sumo-doc".to_string()],
            use_sudo: true,
            netconvert: "netconvert".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Run an embedded broker instead of relying on an external one
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: "0.0.0.0".to_string(), port: 1883 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub simulation: SimulationConfig,
    pub traffic_light: TrafficLightConfig,
    pub mqtt: MqttConfig,
    pub weather: WeatherConfig,
    pub scenario: ScenarioConfig,
    pub bootstrap: BootstrapConfig,
    pub metrics: MetricsConfig,
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    inner: TomlConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self { inner: TomlConfig::default(), config_file: "default".to_string() }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let inner: TomlConfig = toml::from_str(content)?;
        Ok(Self { inner, config_file: "inline".to_string() })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let inner: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self { inner, config_file: path.display().to_string() })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Resolve the path from args/env and load it
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // Simulation

    pub fn sim_binary(&self) -> &str {
        let sim = &self.inner.simulation;
        if sim.gui {
            &sim.gui_binary
        } else {
            &sim.binary
        }
    }

    pub fn sim_gui(&self) -> bool {
        self.inner.simulation.gui
    }

    pub fn sim_gui_binary(&self) -> &str {
        &self.inner.simulation.gui_binary
    }

    pub fn sim_config_file(&self) -> &str {
        &self.inner.simulation.config_file
    }

    pub fn sim_launch(&self) -> bool {
        self.inner.simulation.launch
    }

    pub fn sim_host(&self) -> &str {
        &self.inner.simulation.host
    }

    pub fn sim_port(&self) -> u16 {
        self.inner.simulation.port
    }

    pub fn sim_connect_retries(&self) -> u32 {
        self.inner.simulation.connect_retries
    }

    pub fn sim_connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.inner.simulation.connect_retry_delay_ms)
    }

    pub fn sim_read_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.simulation.read_timeout_ms)
    }

    pub fn max_steps(&self) -> Option<u64> {
        self.inner.simulation.max_steps
    }

    // Traffic light

    pub fn tls_id(&self) -> &str {
        &self.inner.traffic_light.id
    }

    pub fn phase_plan(&self) -> PhasePlan {
        let tl = &self.inner.traffic_light;
        PhasePlan {
            emergency: PhaseIndex(tl.emergency_phase),
            normal: PhaseIndex(tl.normal_phase),
            pedestrian: PhaseIndex(tl.pedestrian_phase),
        }
    }

    // MQTT

    pub fn mqtt_host(&self) -> &str {
        &self.inner.mqtt.host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.inner.mqtt.port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.inner.mqtt.client_id
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.inner.mqtt.topic
    }

    pub fn mqtt_events_topic(&self) -> Option<&str> {
        self.inner.mqtt.events_topic.as_deref()
    }

    /// Out-of-range values fall back to at-most-once
    pub fn mqtt_qos(&self) -> QoS {
        match self.inner.mqtt.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.inner.mqtt.keep_alive_secs)
    }

    pub fn mqtt_queue_size(&self) -> usize {
        self.inner.mqtt.queue_size.max(1)
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.inner.mqtt.username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.inner.mqtt.password.as_deref()
    }

    // Weather

    pub fn weather_enabled(&self) -> bool {
        self.inner.weather.enabled
    }

    pub fn weather_base_url(&self) -> &str {
        &self.inner.weather.base_url
    }

    pub fn weather_api_key(&self) -> &str {
        &self.inner.weather.api_key
    }

    pub fn weather_city(&self) -> &str {
        &self.inner.weather.city
    }

    pub fn weather_refresh(&self) -> Duration {
        Duration::from_secs(self.inner.weather.refresh_secs)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.weather.timeout_ms)
    }

    // Scenario

    pub fn scenario_output_dir(&self) -> &str {
        &self.inner.scenario.output_dir
    }

    pub fn scenario_vehicle_count(&self, scenario: Scenario) -> u32 {
        let s = &self.inner.scenario;
        match scenario {
            Scenario::Best => s.best_vehicles,
            Scenario::Medium => s.medium_vehicles,
            Scenario::Worst => s.worst_vehicles,
        }
    }

    /// Render parameters for `scenario` with the configured knobs applied
    pub fn scenario_params(&self, scenario: Scenario) -> ScenarioParams {
        let s = &self.inner.scenario;
        ScenarioParams {
            scenario,
            vehicle_count: self.scenario_vehicle_count(scenario),
            headway_secs: s.headway_secs,
            emergency_every: s.emergency_every,
            pedestrian_every: s.pedestrian_every,
            tls_id: self.tls_id().to_string(),
        }
    }

    // Bootstrap

    pub fn install_packages(&self) -> bool {
        self.inner.bootstrap.install_packages
    }

    pub fn package_manager(&self) -> &str {
        &self.inner.bootstrap.package_manager
    }

    pub fn packages(&self) -> &[String] {
        &self.inner.bootstrap.packages
    }

    pub fn use_sudo(&self) -> bool {
        self.inner.bootstrap.use_sudo
    }

    pub fn netconvert_binary(&self) -> &str {
        &self.inner.bootstrap.netconvert
    }

    // Metrics

    pub fn metrics_interval_secs(&self) -> u64 {
        self.inner.metrics.interval_secs.max(1)
    }

    pub fn prometheus_port(&self) -> u16 {
        self.inner.metrics.prometheus_port
    }

    // Broker

    pub fn broker_enabled(&self) -> bool {
        self.inner.broker.enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.inner.broker.bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.inner.broker.port
    }

    /// Builder method for overriding the step limit from the command line
    pub fn with_max_steps(mut self, max_steps: Option<u64>) -> Self {
        if max_steps.is_some() {
            self.inner.simulation.max_steps = max_steps;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "test.mosquitto.org");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_topic(), "traffic/priority");
        assert_eq!(config.mqtt_client_id(), "TrafficSystem");
        assert_eq!(config.mqtt_qos(), QoS::AtMostOnce);
        assert_eq!(config.weather_city(), "New York");
        assert_eq!(config.sim_binary(), "sumo");
        assert_eq!(config.sim_config_file(), "sumo_config.sumocfg");
        assert_eq!(config.tls_id(), "1");
        assert_eq!(config.max_steps(), None);
        assert_eq!(config.phase_plan(), PhasePlan::default());
    }

    #[test]
    fn test_gui_selects_gui_binary() {
        let config = Config::from_toml_str("[simulation]\ngui = true\n").unwrap();
        assert_eq!(config.sim_binary(), "sumo-gui");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = Config::from_toml_str(
            r#"
[mqtt]
host = "localhost"
qos = 1

[traffic_light]
id = "J7"
"#,
        )
        .unwrap();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_topic(), "traffic/priority");
        assert_eq!(config.mqtt_qos(), QoS::AtLeastOnce);
        assert_eq!(config.tls_id(), "J7");
        assert_eq!(config.phase_plan().pedestrian, PhaseIndex(2));
    }

    #[test]
    fn test_invalid_qos_falls_back() {
        let config = Config::from_toml_str("[mqtt]\nqos = 7\n").unwrap();
        assert_eq!(config.mqtt_qos(), QoS::AtMostOnce);
    }

    #[test]
    fn test_scenario_params_use_config() {
        let config = Config::from_toml_str(
            "[scenario]\nworst_vehicles = 500\nheadway_secs = 1.0\n\n[traffic_light]\nid = \"c\"\n",
        )
        .unwrap();
        let params = config.scenario_params(Scenario::Worst);
        assert_eq!(params.vehicle_count, 500);
        assert_eq!(params.headway_secs, 1.0);
        assert_eq!(params.tls_id, "c");
        assert_eq!(config.scenario_params(Scenario::Best).vehicle_count, 20);
    }

    #[test]
    fn test_max_steps_override() {
        let config = Config::default().with_max_steps(Some(100));
        assert_eq!(config.max_steps(), Some(100));
        let config = config.with_max_steps(None);
        assert_eq!(config.max_steps(), Some(100));
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["traffic-control".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "traffic-control".to_string(),
            "--config".to_string(),
            "config/lab.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/lab.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["traffic-control".to_string(), "--config=config/lab.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lab.toml");
    }
}
