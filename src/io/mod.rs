//! IO modules - external system interfaces
//!
//! - `traci` - TCP client for the simulator's TraCI control protocol
//! - `weather` - current weather lookup over HTTP
//! - `decision_channel` - bounded channel between the control loop and MQTT
//! - `mqtt_egress` - MQTT publisher for decisions
//! - `process` - subprocess execution for the bootstrap
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod decision_channel;
pub mod mqtt_egress;
pub mod process;
pub mod prometheus;
pub mod traci;
pub mod weather;

pub use decision_channel::{create_decision_channel, DecisionEvent, DecisionSender};
pub use mqtt_egress::DecisionPublisher;
pub use process::{CommandRunner, SystemRunner};
pub use traci::{Simulation, SimulationControl, TraciClient};
pub use weather::WeatherService;
