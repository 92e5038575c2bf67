//! Integration tests for scenario file generation

use std::fs;
use std::str::FromStr;
use traffic_control::domain::scenario::{CONFIG_FILE, NET_FILE, ROUTES_FILE};
use traffic_control::domain::{Scenario, ScenarioFiles, ScenarioParams};
use traffic_control::infra::Config;

#[test]
fn test_write_all_scenarios() {
    let dir = tempfile::tempdir().unwrap();

    for scenario in Scenario::ALL {
        let target = dir.path().join(scenario.as_str());
        let params = ScenarioParams::new(scenario);
        let paths = ScenarioFiles::render(&params).write_to(&target).unwrap();

        let routes = fs::read_to_string(&paths.routes).unwrap();
        assert_eq!(
            routes.matches("<vehicle ").count() as u32,
            scenario.default_vehicle_count()
        );
        assert!(paths.nodes.is_file());
        assert!(paths.edges.is_file());
        assert!(paths.config.ends_with(CONFIG_FILE));
        // produced by netconvert, not by us
        assert!(!paths.net.exists());
    }
}

#[test]
fn test_sumocfg_references_generated_files() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ScenarioFiles::render(&ScenarioParams::new(Scenario::Best))
        .write_to(dir.path())
        .unwrap();

    let cfg = fs::read_to_string(&paths.config).unwrap();
    assert!(cfg.contains(&format!("<net-file value=\"{NET_FILE}\"/>")));
    assert!(cfg.contains(&format!("<route-files value=\"{ROUTES_FILE}\"/>")));
}

#[test]
fn test_configured_counts_and_tls_id() {
    let config = Config::from_toml_str(
        "[traffic_light]\nid = \"junction\"\n\n[scenario]\nworst_vehicles = 40\nemergency_every = 4\n",
    )
    .unwrap();
    let params = config.scenario_params(Scenario::from_str(" WORST ").unwrap());
    let files = ScenarioFiles::render(&params);

    assert_eq!(files.routes.matches("<vehicle ").count(), 40);
    assert_eq!(files.routes.matches("type=\"emergency\"").count(), 10);
    assert!(files.nodes.contains("<node id=\"junction\""));
    assert!(files.edges.contains("to=\"junction\""));
}

#[test]
fn test_write_into_missing_nested_dir() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let paths = ScenarioFiles::render(&ScenarioParams::new(Scenario::Medium))
        .write_to(&nested)
        .unwrap();
    assert_eq!(paths.dir, nested);
    assert!(paths.routes.is_file());
}
