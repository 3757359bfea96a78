//! End-to-end: factory file on disk through the catalog, balancer and
//! renderers.

use std::fs;

use factory_balancer::config::load_factory_config;
use factory_balancer::solution::ItemRole;
use factory_balancer::{balance, db, logging, render, BalanceError, SolveFailure, SolverSettings};
use rusqlite::Connection;

const SULFURIC_ACID: &str = r#"
recipes:
  - m: electrolyzer
    tier: LV
    inputs: { water: 500 }
    outputs: { hydrogen: 1000, oxygen: 500 }
    dur: 1000
    eut: 30
  - m: lcr
    tier: LV
    inputs: { sulfur dust: 1, hydrogen: 2000 }
    outputs: { hydrogen sulfide: 1000 }
    dur: 60
    eut: 8
  - m: lcr
    tier: LV
    inputs: { hydrogen sulfide: 1000, oxygen: 4000 }
    outputs: { sulfuric acid: 1000, water: 1000 }
    dur: 480
    eut: 8
  - m: offshore pump
    tier: LV
    outputs: { water: 1000 }
    dur: 20
    eut: 0
targets:
  sulfuric acid: 125
"#;

fn write_factory(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn yaml_factory_balances_end_to_end() {
    logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let factory = load_factory_config(&write_factory(&dir, "acid.yaml", SULFURIC_ACID)).unwrap();
    let solved = balance(&factory.recipes, &factory.targets, &SolverSettings::default()).unwrap();

    // An acid reactor makes 41.67 L/s, so 3 of them eat 125 L/s of H2S and
    // 500 L/s of oxygen.
    let acid = solved.item("sulfuric_acid").unwrap();
    assert_eq!(acid.role, ItemRole::Target);
    assert!((acid.produced - 125.0).abs() < 1e-6);
    assert!((solved.machines[2].multiplier - 3.0).abs() < 1e-6);
    assert!((solved.machines[1].multiplier - 0.375).abs() < 1e-6);

    // Oxygen binds, not hydrogen: 50 electrolyzers at 10 L/s oxygen each,
    // leaving 750 L/s of hydrogen over.
    assert!((solved.machines[0].multiplier - 50.0).abs() < 1e-5);
    assert_eq!(solved.machines[0].whole_machines, 50);
    let hydrogen = solved.item("hydrogen").unwrap();
    assert!((hydrogen.surplus - 750.0).abs() < 1e-3);

    // The acid reactors return 125 L/s of water; the pump covers the rest.
    assert!((solved.machines[3].multiplier - 0.375).abs() < 1e-6);
    let water = solved.item("water").unwrap();
    assert_eq!(water.role, ItemRole::Intermediate);
    assert!(water.surplus.abs() < 1e-6);
}

#[test]
fn json_output_and_dot_render() {
    let dir = tempfile::tempdir().unwrap();
    let json = r#"{
        "recipes": [
            {"m": "Electrolyzer", "tier": "LV", "inputs": {"water": 1}, "outputs": {"oxygen": 1, "hydrogen": 2}, "dur": 20, "eut": 30}
        ],
        "targets": {"hydrogen": 100}
    }"#;
    let factory = load_factory_config(&write_factory(&dir, "h2.json", json)).unwrap();
    let solved = balance(&factory.recipes, &factory.targets, &SolverSettings::default()).unwrap();

    let value = serde_json::to_value(&solved).unwrap();
    let multiplier = value["machines"][0]["multiplier"].as_f64().unwrap();
    assert!((multiplier - 50.0).abs() < 1e-6);
    assert_eq!(value["items"][1]["role"], "Target");

    let dot = render::to_dot(&solved);
    assert!(dot.contains("hydrogen target"));
    assert!(dot.contains("oxygen surplus"));
}

#[test]
fn catalog_round_trip_gives_the_same_answer() {
    let dir = tempfile::tempdir().unwrap();
    let factory = load_factory_config(&write_factory(&dir, "acid.yml", SULFURIC_ACID)).unwrap();

    let mut conn = Connection::open(dir.path().join("catalog.db")).unwrap();
    db::init_schema(&conn).unwrap();
    db::insert_recipes(&mut conn, &factory.recipes).unwrap();
    let stored = db::load_recipes(&conn).unwrap();
    assert_eq!(stored, factory.recipes);

    let settings = SolverSettings::default();
    let direct = balance(&factory.recipes, &factory.targets, &settings).unwrap();
    let from_catalog = balance(&stored, &factory.targets, &settings).unwrap();
    assert_eq!(direct, from_catalog);
}

#[test]
fn target_nobody_makes_is_infeasible() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = "recipes:\n  - {m: furnace, tier: LV, inputs: {iron ore: 1}, outputs: {iron: 1}, dur: 20, eut: 4}\ntargets:\n  iron ore: 5\n";
    let factory = load_factory_config(&write_factory(&dir, "iron.yaml", yaml)).unwrap();
    let err = balance(&factory.recipes, &factory.targets, &SolverSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        BalanceError::Solve(SolveFailure::Infeasible { constraint: Some(ref row), .. }) if row == "target[iron_ore]"
    ));
}
