//! Decision policy: vehicle type + weather -> decision -> light phase

use crate::domain::types::{Decision, PhaseIndex, VehicleType, WeatherCondition};

/// Phase numbers of the controlled light's program used for each outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePlan {
    /// Green for the approach carrying the emergency vehicle
    pub emergency: PhaseIndex,
    /// Regular cycle
    pub normal: PhaseIndex,
    /// Pedestrian crossing phase
    pub pedestrian: PhaseIndex,
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self { emergency: PhaseIndex(0), normal: PhaseIndex(1), pedestrian: PhaseIndex(2) }
    }
}

/// Decide how to treat a vehicle. Emergency vehicles win over weather.
pub fn decide(vehicle_type: &VehicleType, weather: &WeatherCondition) -> Decision {
    if vehicle_type.is_emergency() {
        Decision::EmergencyPriority
    } else if weather.is_adverse() {
        Decision::BadWeatherExtension
    } else {
        Decision::NormalFlow
    }
}

/// Map a decision to the phase to force on the light.
///
/// Bad-weather decisions do not have a phase of their own; they fall through
/// to the pedestrian/normal choice like regular traffic.
pub fn phase_for(plan: &PhasePlan, decision: Decision, pedestrians_nearby: bool) -> PhaseIndex {
    match decision {
        Decision::EmergencyPriority => plan.emergency,
        _ if pedestrians_nearby => plan.pedestrian,
        _ => plan.normal,
    }
}
