//! Shared types for the traffic controller

use serde::{Serialize, Serializer};
use std::fmt;

/// Vehicle type id reported by the simulator for emergency vehicles
pub const EMERGENCY_TYPE: &str = "emergency";

/// Newtype wrapper for simulator vehicle ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VehicleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Newtype wrapper for simulator vehicle type ids (`vType` in route files)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VehicleType(pub String);

impl VehicleType {
    pub fn is_emergency(&self) -> bool {
        self.0 == EMERGENCY_TYPE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VehicleType {
    fn from(t: String) -> Self {
        Self(t)
    }
}

impl From<&str> for VehicleType {
    fn from(t: &str) -> Self {
        Self(t.to_string())
    }
}

/// Weather condition group as reported in `weather[0].main`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WeatherCondition {
    Clear,
    Clouds,
    Rain,
    Drizzle,
    Thunderstorm,
    Snow,
    Mist,
    Fog,
    Other(String),
    /// Nothing fetched yet
    #[default]
    Unknown,
}

impl WeatherCondition {
    pub fn parse(main: &str) -> Self {
        match main {
            "Clear" => Self::Clear,
            "Clouds" => Self::Clouds,
            "Rain" => Self::Rain,
            "Drizzle" => Self::Drizzle,
            "Thunderstorm" => Self::Thunderstorm,
            "Snow" => Self::Snow,
            "Mist" => Self::Mist,
            "Fog" => Self::Fog,
            "" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Conditions that warrant extended green phases
    pub fn is_adverse(&self) -> bool {
        matches!(self, Self::Fog | Self::Rain)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Clear => "Clear",
            Self::Clouds => "Clouds",
            Self::Rain => "Rain",
            Self::Drizzle => "Drizzle",
            Self::Thunderstorm => "Thunderstorm",
            Self::Snow => "Snow",
            Self::Mist => "Mist",
            Self::Fog => "Fog",
            Self::Other(s) => s,
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WeatherCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Traffic management decision for a single vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    EmergencyPriority,
    BadWeatherExtension,
    NormalFlow,
}

impl Decision {
    pub const ALL: [Decision; 3] =
        [Decision::EmergencyPriority, Decision::BadWeatherExtension, Decision::NormalFlow];

    /// Text published on the decision topic. Downstream consumers match on
    /// these exact strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::EmergencyPriority => "Priority to Emergency Vehicle",
            Decision::BadWeatherExtension => "Extend Green Light Due to Bad Weather",
            Decision::NormalFlow => "Normal Traffic Flow",
        }
    }

    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Decision::EmergencyPriority => "emergency",
            Decision::BadWeatherExtension => "bad_weather",
            Decision::NormalFlow => "normal",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Phase index within the controlled traffic light's program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PhaseIndex(pub i32);

impl fmt::Display for PhaseIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_strings() {
        assert_eq!(Decision::EmergencyPriority.as_str(), "Priority to Emergency Vehicle");
        assert_eq!(
            Decision::BadWeatherExtension.as_str(),
            "Extend Green Light Due to Bad Weather"
        );
        assert_eq!(Decision::NormalFlow.as_str(), "Normal Traffic Flow");
    }

    #[test]
    fn test_weather_parse() {
        assert_eq!(WeatherCondition::parse("Rain"), WeatherCondition::Rain);
        assert_eq!(WeatherCondition::parse("Fog"), WeatherCondition::Fog);
        assert_eq!(WeatherCondition::parse(""), WeatherCondition::Unknown);
        assert_eq!(
            WeatherCondition::parse("Tornado"),
            WeatherCondition::Other("Tornado".to_string())
        );
        assert_eq!(WeatherCondition::parse("Tornado").as_str(), "Tornado");
    }

    #[test]
    fn test_only_fog_and_rain_are_adverse() {
        assert!(WeatherCondition::Fog.is_adverse());
        assert!(WeatherCondition::Rain.is_adverse());
        assert!(!WeatherCondition::Drizzle.is_adverse());
        assert!(!WeatherCondition::Snow.is_adverse());
        assert!(!WeatherCondition::Mist.is_adverse());
        assert!(!WeatherCondition::Unknown.is_adverse());
        // Case sensitive, matching the provider's casing
        assert!(!WeatherCondition::parse("rain").is_adverse());
    }

    #[test]
    fn test_emergency_type_exact_match() {
        assert!(VehicleType::from("emergency").is_emergency());
        assert!(!VehicleType::from("Emergency").is_emergency());
        assert!(!VehicleType::from("DEFAULT_VEHTYPE").is_emergency());
    }

    #[test]
    fn test_decision_serializes_as_wire_string() {
        let json = serde_json::to_string(&Decision::NormalFlow).unwrap();
        assert_eq!(json, "\"Normal Traffic Flow\"");
    }
}
