//! Domain models - traffic types, decision policy and scenarios
//!
//! - `types` - vehicles, weather conditions, decisions and phases
//! - `policy` - the decision rule and the phase it maps to
//! - `scenario` - best/medium/worst simulation inputs rendered as XML

pub mod policy;
pub mod scenario;
pub mod types;

pub use policy::{decide, phase_for, PhasePlan};
pub use scenario::{Scenario, ScenarioFiles, ScenarioParams, ScenarioPaths};
pub use types::{Decision, PhaseIndex, VehicleId, VehicleType, WeatherCondition};
