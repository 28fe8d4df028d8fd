// nomenclature.rs - End-to-end runs against a state directory

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use cgnomen::data::loaders::load_metadata;
use cgnomen::output::{write_metadata_tsv, SweepCsvWriter};
use cgnomen::pipeline::simulation::distance_matrix_for;
use cgnomen::pipeline::{arrival_order, run_sweep, SweepConfig, SweepGrid};
use cgnomen::prelude::*;

const LOCI: [&str; 10] = ["l1", "l2", "l3", "l4", "l5", "l6", "l7", "l8", "l9", "l10"];

fn write_profiles(path: &Path, rows: &[(&str, [&str; 10])]) {
    let mut text = format!("FILE\t{}\n", LOCI.join("\t"));
    for (key, calls) in rows {
        text.push_str(&format!("{}\t{}\n", key, calls.join("\t")));
    }
    fs::write(path, text).unwrap();
}

const A: [&str; 10] = ["1", "1", "1", "1", "1", "1", "1", "1", "1", "1"];
const B: [&str; 10] = ["2", "2", "2", "2", "2", "2", "1", "1", "1", "1"];
const BRIDGE: [&str; 10] = ["2", "2", "2", "1", "1", "1", "1", "1", "1", "1"];
const POOR: [&str; 10] = ["-", "-", "-", "1", "1", "1", "1", "1", "1", "1"];

fn config(state: &Path) -> CalculatorConfig {
    CalculatorConfig {
        thresholds: Thresholds::new(vec![50.0, 10.0]).unwrap(),
        qc: QcSettings {
            min_presence: 0.8,
            length_range: None,
        },
        prefix: "TST".to_string(),
        policy_type: "permissive".to_string(),
        policy_config: String::new(),
        state_dir: state.to_path_buf(),
    }
}

fn load_store(profiles: &Path, metadata: Option<&Path>) -> MemoryEntryStore {
    let matrix = AllelicMatrix::from_file(profiles, "-").unwrap();
    let metadata = metadata.map(|p| load_metadata(p).unwrap()).unwrap_or_default();
    MemoryEntryStore::from_matrix(&matrix, &metadata)
}

fn code<'a>(store: &'a MemoryEntryStore, key: &str) -> Option<&'a str> {
    store.entry(key).and_then(|e| e.code.as_deref())
}

#[test]
fn test_incremental_runs_merge_and_record_history() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let profiles = dir.path().join("profiles.tsv");
    let metadata = dir.path().join("metadata.tsv");
    let calculator = Calculator::new(config(&state)).unwrap();

    // First run: two separate level-1 clusters and one QC failure
    write_profiles(
        &profiles,
        &[("a", A), ("a2", A), ("b", B), ("b2", B), ("poor", POOR)],
    );
    let mut store = load_store(&profiles, None);
    let report = calculator.run(&mut store).unwrap();
    assert_eq!(report.newly_named, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(code(&store, "a"), Some("TST - 1.1"));
    assert_eq!(code(&store, "b"), Some("TST - 2.1"));
    assert_eq!(code(&store, "poor"), Some("FAILED QC: CORE"));
    assert_eq!(report.names_given, 4);
    write_metadata_tsv(&metadata, &store, "test").unwrap();

    // Second run: a sample within reach of both clusters joins them
    write_profiles(
        &profiles,
        &[("a", A), ("a2", A), ("b", B), ("b2", B), ("poor", POOR), ("bridge", BRIDGE)],
    );
    let mut store = load_store(&profiles, Some(&metadata));
    let report = calculator.run(&mut store).unwrap();
    assert_eq!(report.newly_named, 1);
    assert_eq!(report.merges, 1);
    assert_eq!(code(&store, "a"), Some("TST - 1.1"));
    assert_eq!(code(&store, "b"), Some("TST - 1.2"));
    assert_eq!(code(&store, "b2"), Some("TST - 1.2"));

    let history = &store.entry("b").unwrap().history;
    assert_eq!(history.len(), 2);
    assert!(history[0].starts_with("None -> TST - 2.1: "));
    assert!(history[1].starts_with("TST - 2.1 -> TST - 1.2: "));
    assert!(report.renames.iter().any(|r| r.key == "b"));
    assert!(store.entry("a").unwrap().history.len() == 1);

    // The previous tree and profile store were kept
    let layout = calculator.layout();
    let tree_backups = fs::read_dir(layout.tree_dir())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("tree_"))
        .count();
    assert_eq!(tree_backups, 1);
    assert!(layout.backup_dir().exists());
    assert!(!layout.lock_file().exists());
}

#[test]
fn test_tree_and_store_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let profiles = dir.path().join("profiles.tsv");
    write_profiles(&profiles, &[("a", A), ("b", B)]);

    let calculator = Calculator::new(config(&state)).unwrap();
    let mut store = load_store(&profiles, None);
    calculator.run(&mut store).unwrap();

    let layout = calculator.layout();
    let tree = Tree::load(&layout.tree_file(), 2).unwrap();
    assert_eq!(tree.len(), 2);
    let stored = ProfileStore::open(&layout.profiles_dir(), LOCI.len()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored.get("b").unwrap()[0], 2);
    assert_eq!(stored.runs(), 2);
}

#[test]
fn test_stale_lock_blocks_every_change() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    let profiles = dir.path().join("profiles.tsv");
    write_profiles(&profiles, &[("a", A)]);

    let calculator = Calculator::new(config(&state)).unwrap();
    fs::create_dir_all(&state).unwrap();
    fs::write(calculator.layout().lock_file(), "").unwrap();

    let mut store = load_store(&profiles, None);
    assert!(matches!(calculator.run(&mut store), Err(NomenError::Lock(_))));
    assert!(code(&store, "a").is_none());
    assert!(!calculator.layout().tree_file().exists());
}

#[test]
fn test_sweep_streams_every_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let profiles = dir.path().join("profiles.tsv");
    write_profiles(
        &profiles,
        &[("a", A), ("b", B), ("a2", A), ("b2", B), ("bridge", BRIDGE), ("poor", POOR)],
    );
    let store = load_store(&profiles, None);
    let qc = QcSettings {
        min_presence: 0.8,
        length_range: None,
    };
    let order = arrival_order(&store, &qc);
    assert_eq!(order.len(), 5);

    let cache = dir.path().join("matrix.lz4");
    let distances = distance_matrix_for(&store, &order, Some(&cache)).unwrap();
    assert!(cache.exists());

    let output = dir.path().join("sweep.csv");
    let writer = Arc::new(Mutex::new(SweepCsvWriter::create(&output, 2).unwrap()));
    let sink = Arc::clone(&writer);
    let grid = SweepGrid::parse("40,60;5,20", 1.0).unwrap();
    let summary = run_sweep(
        &grid,
        Arc::new(distances),
        Arc::new(order),
        &SweepConfig {
            workers: 2,
            chunk_size: 1,
            deadline: None,
        },
        move |result| {
            sink.lock()
                .unwrap()
                .write(result)
                .map_err(NomenError::Serialization)
        },
    )
    .unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert!(!summary.timed_out);
    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(text.lines().count(), 5);
    assert!(text.starts_with("threshold_1,threshold_2,total_changes,kept_0,kept_1"));
}
