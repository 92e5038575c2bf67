//! Named traffic scenarios and the simulator input files generated for them
//!
//! The network is a single signalised four-arm intersection. Its centre node
//! carries the traffic-light id the controller drives, so a generated
//! scenario works with the default `[traffic_light]` settings out of the box.

use anyhow::Context;
use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const NODES_FILE: &str = "intersection.nod.xml";
pub const EDGES_FILE: &str = "intersection.edg.xml";
pub const NET_FILE: &str = "intersection.net.xml";
pub const ROUTES_FILE: &str = "intersection.rou.xml";
pub const CONFIG_FILE: &str = "sumo_config.sumocfg";

/// Arm length from the centre node in metres
const ARM_LENGTH_M: f64 = 200.0;
/// Simulated time kept after the last departure so traffic can clear
const DRAIN_SECS: f64 = 600.0;
const MIN_END_SECS: f64 = 3600.0;

/// Through and right-turn movements, as (route id, edges)
const ROUTES: [(&str, &str); 8] = [
    ("north_south", "n_in s_out"),
    ("south_north", "s_in n_out"),
    ("east_west", "e_in w_out"),
    ("west_east", "w_in e_out"),
    ("north_west", "n_in w_out"),
    ("south_east", "s_in e_out"),
    ("east_north", "e_in n_out"),
    ("west_south", "w_in s_out"),
];

/// Pedestrian walks crossing the intersection
const WALKS: [&str; 2] = ["w_in e_out", "n_in s_out"];

/// Named traffic load preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    Best,
    Medium,
    Worst,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Best, Scenario::Medium, Scenario::Worst];

    /// Default number of generated vehicles
    pub fn default_vehicle_count(&self) -> u32 {
        match self {
            Scenario::Best => 20,
            Scenario::Medium => 60,
            Scenario::Worst => 150,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Best => "best",
            Scenario::Medium => "medium",
            Scenario::Worst => "worst",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" => Ok(Scenario::Best),
            "medium" => Ok(Scenario::Medium),
            "worst" => Ok(Scenario::Worst),
            other => anyhow::bail!("unknown scenario '{}' (expected best, medium or worst)", other),
        }
    }
}

/// Knobs for rendering a scenario
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioParams {
    pub scenario: Scenario,
    pub vehicle_count: u32,
    /// Seconds between consecutive departures
    pub headway_secs: f64,
    /// Every Nth vehicle is an emergency vehicle (0 disables)
    pub emergency_every: u32,
    /// A pedestrian departs alongside every Nth vehicle (0 disables)
    pub pedestrian_every: u32,
    /// Id of the centre node, which becomes the traffic light id
    pub tls_id: String,
}

impl ScenarioParams {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            vehicle_count: scenario.default_vehicle_count(),
            headway_secs: 2.0,
            emergency_every: 10,
            pedestrian_every: 5,
            tls_id: "1".to_string(),
        }
    }

    fn end_time(&self) -> f64 {
        let last_depart = self.vehicle_count.saturating_sub(1) as f64 * self.headway_secs;
        (last_depart + DRAIN_SECS).max(MIN_END_SECS)
    }
}

/// Rendered XML for one scenario
#[derive(Debug, Clone)]
pub struct ScenarioFiles {
    pub nodes: String,
    pub edges: String,
    pub routes: String,
    pub config: String,
}

/// Locations of the files written by [`ScenarioFiles::write_to`]
#[derive(Debug, Clone)]
pub struct ScenarioPaths {
    pub dir: PathBuf,
    pub nodes: PathBuf,
    pub edges: PathBuf,
    pub net: PathBuf,
    pub routes: PathBuf,
    pub config: PathBuf,
}

impl ScenarioPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            nodes: dir.join(NODES_FILE),
            edges: dir.join(EDGES_FILE),
            net: dir.join(NET_FILE),
            routes: dir.join(ROUTES_FILE),
            config: dir.join(CONFIG_FILE),
        }
    }
}

impl ScenarioFiles {
    pub fn render(params: &ScenarioParams) -> Self {
        Self {
            nodes: render_nodes(&params.tls_id),
            edges: render_edges(&params.tls_id),
            routes: render_routes(params),
            config: render_config(params.end_time()),
        }
    }

    /// Write all files into `dir`, creating it if needed. The network file
    /// itself is produced later by `netconvert`.
    pub fn write_to(&self, dir: &Path) -> anyhow::Result<ScenarioPaths> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create scenario dir {}", dir.display()))?;

        let paths = ScenarioPaths::in_dir(dir);
        for (path, content) in [
            (&paths.nodes, &self.nodes),
            (&paths.edges, &self.edges),
            (&paths.routes, &self.routes),
            (&paths.config, &self.config),
        ] {
            fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(paths)
    }
}

fn render_nodes(tls_id: &str) -> String {
    let l = ARM_LENGTH_M;
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nodes>
    <node id="{tls_id}" x="0.0" y="0.0" type="traffic_light"/>
    <node id="n" x="0.0" y="{l:.1}" type="priority"/>
    <node id="s" x="0.0" y="-{l:.1}" type="priority"/>
    <node id="e" x="{l:.1}" y="0.0" type="priority"/>
    <node id="w" x="-{l:.1}" y="0.0" type="priority"/>
</nodes>
"#
    )
}

fn render_edges(tls_id: &str) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<edges>\n");
    for arm in ["n", "s", "e", "w"] {
        let _ = writeln!(
            out,
            r#"    <edge id="{arm}_in" from="{arm}" to="{tls_id}" numLanes="2" speed="13.89"/>"#
        );
        let _ = writeln!(
            out,
            r#"    <edge id="{arm}_out" from="{tls_id}" to="{arm}" numLanes="2" speed="13.89"/>"#
        );
    }
    out.push_str("</edges>\n");
    out
}

fn render_routes(params: &ScenarioParams) -> String {
    let mut out = String::with_capacity(256 + params.vehicle_count as usize * 96);
    out.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<routes>
    <vType id="car" vClass="passenger" accel="2.6" decel="4.5" sigma="0.5" length="5" maxSpeed="13.89"/>
    <vType id="emergency" vClass="emergency" guiShape="emergency" color="1,0,0" accel="3.0" decel="6.0" sigma="0.2" length="6.5" maxSpeed="25" speedFactor="1.5"/>
"#,
    );
    for (id, edges) in ROUTES {
        let _ = writeln!(out, r#"    <route id="{id}" edges="{edges}"/>"#);
    }

    for i in 0..params.vehicle_count {
        let depart = i as f64 * params.headway_secs;
        let (route, _) = ROUTES[i as usize % ROUTES.len()];
        let is_emergency =
            params.emergency_every > 0 && (i + 1) % params.emergency_every == 0;
        let (prefix, vtype) = if is_emergency { ("ev", "emergency") } else { ("veh", "car") };
        let _ = writeln!(
            out,
            r#"    <vehicle id="{prefix}{i}" type="{vtype}" route="{route}" depart="{depart:.2}"/>"#
        );

        if params.pedestrian_every > 0 && i % params.pedestrian_every == 0 {
            let walk = WALKS[(i / params.pedestrian_every) as usize % WALKS.len()];
            let _ = writeln!(out, r#"    <person id="ped{i}" depart="{depart:.2}">"#);
            let _ = writeln!(out, r#"        <walk edges="{walk}"/>"#);
            out.push_str("    </person>\n");
        }
    }
    out.push_str("</routes>\n");
    out
}

fn render_config(end: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration>
    <input>
        <net-file value="{NET_FILE}"/>
        <route-files value="{ROUTES_FILE}"/>
    </input>
    <time>
        <begin value="0"/>
        <end value="{end:.0}"/>
    </time>
</configuration>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        assert_eq!("best".parse::<Scenario>().unwrap(), Scenario::Best);
        assert_eq!(" Medium\n".parse::<Scenario>().unwrap(), Scenario::Medium);
        assert_eq!("WORST".parse::<Scenario>().unwrap(), Scenario::Worst);
        assert!("average".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_vehicle_counts_grow_with_severity() {
        assert!(Scenario::Best.default_vehicle_count() < Scenario::Medium.default_vehicle_count());
        assert!(Scenario::Medium.default_vehicle_count() < Scenario::Worst.default_vehicle_count());
    }

    #[test]
    fn test_routes_contain_requested_vehicles() {
        let params = ScenarioParams::new(Scenario::Best);
        let files = ScenarioFiles::render(&params);
        assert_eq!(files.routes.matches("<vehicle ").count(), 20);
        // 20 vehicles, every 10th is an emergency vehicle
        assert_eq!(files.routes.matches(r#"type="emergency""#).count(), 2);
        assert!(files.routes.contains(r#"<vehicle id="ev9" type="emergency""#));
        // pedestrians at 0, 5, 10, 15
        assert_eq!(files.routes.matches("<person ").count(), 4);
    }

    #[test]
    fn test_emergency_and_pedestrians_can_be_disabled() {
        let params = ScenarioParams {
            emergency_every: 0,
            pedestrian_every: 0,
            ..ScenarioParams::new(Scenario::Medium)
        };
        let files = ScenarioFiles::render(&params);
        assert_eq!(files.routes.matches("<vehicle ").count(), 60);
        assert!(!files.routes.contains(r#"type="emergency""#));
        assert!(!files.routes.contains("<person "));
    }

    #[test]
    fn test_centre_node_is_traffic_light() {
        let params = ScenarioParams { tls_id: "J0".to_string(), ..ScenarioParams::new(Scenario::Best) };
        let files = ScenarioFiles::render(&params);
        assert!(files.nodes.contains(r#"<node id="J0" x="0.0" y="0.0" type="traffic_light"/>"#));
        assert!(files.edges.contains(r#"<edge id="n_in" from="n" to="J0""#));
    }

    #[test]
    fn test_config_references_net_and_routes() {
        let files = ScenarioFiles::render(&ScenarioParams::new(Scenario::Worst));
        assert!(files.config.contains(NET_FILE));
        assert!(files.config.contains(ROUTES_FILE));
        assert!(files.config.contains(r#"<end value="3600"/>"#));
    }

    #[test]
    fn test_end_time_extends_for_long_runs() {
        let params = ScenarioParams {
            vehicle_count: 2001,
            headway_secs: 2.0,
            ..ScenarioParams::new(Scenario::Worst)
        };
        // last departure at 4000s plus drain
        assert_eq!(params.end_time(), 4600.0);
    }
}
