//! Services - the control loop and the environment bootstrap
//!
//! - `controller` - per-step decisions against a running simulation
//! - `bootstrap` - installs the simulator and prepares scenarios

pub mod bootstrap;
pub mod controller;

pub use bootstrap::Bootstrap;
pub use controller::{shutdown_on_signal, ControlLoop, RunSummary, StopReason};
