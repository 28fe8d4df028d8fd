// simulation.rs - Replays sample arrival to measure code stability

use crate::core::history::ChangeTracker;
use crate::core::matrix::DistanceMatrix;
use crate::core::name::Name;
use crate::core::naming::{Namer, Thresholds};
use crate::core::tree::Tree;
use crate::data::entry::{EntryStore, MemoryEntryStore};
use crate::data::qc::QcSettings;
use crate::error::{NomenError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Samples added per simulated run after seeding.
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// Outcome of one simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub thresholds: Vec<f64>,
    pub seed_size: usize,
    pub added: usize,
    pub iterations: usize,
    pub tracker: ChangeTracker,
}

impl SimulationReport {
    pub fn total_changes(&self) -> usize {
        self.tracker.total_changes()
    }
}

/// Keys passing QC, ordered by upload date.
pub fn arrival_order(store: &MemoryEntryStore, qc: &QcSettings) -> Vec<String> {
    store
        .by_upload_date()
        .into_iter()
        .filter(|e| match e.calls.as_deref() {
            Some(calls) => qc.check(calls, e.length).is_empty(),
            None => false,
        })
        .map(|e| e.key.clone())
        .collect()
}

/// Distances between all `order` samples, from `cache` when it covers them.
///
/// A freshly computed matrix is written back to `cache`.
pub fn distance_matrix_for(
    store: &MemoryEntryStore,
    order: &[String],
    cache: Option<&Path>,
) -> Result<DistanceMatrix> {
    if let Some(path) = cache.filter(|p| p.exists()) {
        let matrix = DistanceMatrix::load(path)?;
        if order.iter().all(|key| matrix.contains(key)) {
            return Ok(matrix);
        }
        warn!(
            "⚠️  Matrix cache {} does not cover every sample, recomputing",
            path.display()
        );
    }

    let profiles = order
        .iter()
        .map(|key| {
            store
                .entry(key)
                .and_then(|e| e.calls.as_deref())
                .ok_or_else(|| NomenError::NotFound(format!("no allele calls for '{}'", key)))
        })
        .collect::<Result<Vec<&[i32]>>>()?;
    let matrix = DistanceMatrix::from_profiles(order, &profiles)?;
    if let Some(path) = cache {
        matrix.save(path)?;
    }
    Ok(matrix)
}

/// Names samples in arrival order from precomputed distances.
///
/// The first half of the order seeds the tree in one pass; the rest
/// arrives in chunks. After each chunk, changed codes of samples whose
/// previous code was shared are counted by the depth kept.
pub struct Simulation<'a> {
    matrix: &'a DistanceMatrix,
    namer: Namer,
    chunk_size: usize,
    show_progress: bool,
}

struct Run {
    tree: Tree,
    named: Vec<String>,
    current: HashMap<String, Name>,
}

impl<'a> Simulation<'a> {
    pub fn new(matrix: &'a DistanceMatrix, namer: Namer) -> Self {
        Self {
            matrix,
            namer,
            chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: false,
        }
    }

    /// Permissive simulation over `thresholds`.
    pub fn permissive(matrix: &'a DistanceMatrix, thresholds: &[f64]) -> Result<Self> {
        Ok(Self::new(matrix, Namer::permissive(Thresholds::new(thresholds.to_vec())?)))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn run(&self, order: &[String]) -> Result<SimulationReport> {
        if let Some(missing) = order.iter().find(|key| !self.matrix.contains(key)) {
            return Err(NomenError::NotFound(format!(
                "'{}' has no row in the distance matrix",
                missing
            )));
        }

        let depth = self.namer.thresholds().depth();
        let (seed, adding) = order.split_at(order.len() / 2);
        let seed_keys: HashSet<&str> = seed.iter().map(String::as_str).collect();
        let chunks: Vec<&[String]> = adding.chunks(self.chunk_size).collect();

        let mut run = Run {
            tree: Tree::new(depth),
            named: Vec::with_capacity(order.len()),
            current: HashMap::with_capacity(order.len()),
        };
        let mut tracker = ChangeTracker::new(depth);

        debug!(
            "Simulating {} samples ({} seed, {} chunks) with thresholds {}",
            order.len(),
            seed.len(),
            chunks.len(),
            self.namer.thresholds()
        );
        self.step(&mut run, seed, 0, &seed_keys, &mut tracker)?;

        let pb = if self.show_progress {
            let pb = ProgressBar::new(chunks.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA: {eta}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };
        for (i, chunk) in chunks.iter().enumerate() {
            self.step(&mut run, chunk, i + 1, &seed_keys, &mut tracker)?;
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(SimulationReport {
            thresholds: self.namer.thresholds().as_slice().to_vec(),
            seed_size: seed.len(),
            added: adding.len(),
            iterations: chunks.len(),
            tracker,
        })
    }

    fn step(
        &self,
        run: &mut Run,
        selection: &[String],
        iteration: usize,
        seed_keys: &HashSet<&str>,
        tracker: &mut ChangeTracker,
    ) -> Result<()> {
        let mut frequencies: HashMap<Name, usize> = HashMap::new();
        for key in &run.named {
            if let Some(name) = run.tree.get_name(key) {
                *frequencies.entry(name.clone()).or_insert(0) += 1;
            }
        }

        for key in selection {
            if run.tree.has_resolved_name(key) {
                continue;
            }
            let distances = self.matrix.distances_from(key, &run.named)?;
            let assignment = self.namer.assign(&mut run.tree, &run.named, key, &distances, true)?;
            if assignment.resolved {
                *frequencies.entry(assignment.name).or_insert(0) += 1;
                run.named.push(key.clone());
            }
        }

        for key in &run.named {
            let Some(new) = run.tree.get_name(key) else {
                continue;
            };
            match run.current.get(key) {
                Some(old) if old == new => continue,
                Some(old) if iteration > 0 && frequencies.get(old).copied().unwrap_or(0) > 1 => {
                    tracker.track(old, new, iteration, seed_keys.contains(key.as_str()));
                }
                _ => {}
            }
            run.current.insert(key.clone(), new.clone());
        }
        Ok(())
    }
}

/// Logs per-depth change counts of a finished simulation.
pub fn log_report(report: &SimulationReport) {
    info!("📊 === SIMULATION RESULTS ===");
    info!(
        "  🌱 Seed: {} samples, added: {} in {} chunks",
        report.seed_size, report.added, report.iterations
    );
    for (kept, total) in report.tracker.total.iter().enumerate() {
        info!(
            "  🔁 Changes keeping {} levels: {} (seed {}, post {})",
            kept, total, report.tracker.seed[kept], report.tracker.post[kept]
        );
    }
    info!("  ✅ Total code changes: {}", report.total_changes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(keys: &[&str], profiles: &[Vec<i32>]) -> DistanceMatrix {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        DistanceMatrix::from_profiles(&keys, profiles).unwrap()
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_stable_dataset_has_no_changes() {
        let m = matrix(
            &["a", "b", "c", "d"],
            &[vec![1; 10], vec![1; 10], vec![2; 10], vec![2; 10]],
        );
        let sim = Simulation::permissive(&m, &[50.0, 10.0]).unwrap().with_chunk_size(1);
        let report = sim.run(&keys(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(report.seed_size, 2);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.total_changes(), 0);
    }

    #[test]
    fn test_merge_of_shared_code_is_counted() {
        // seed: a and a2 share 1.1, b is alone in 2.1; the bridge merges 2 into 1
        let a = vec![1; 10];
        let b = vec![2, 2, 2, 2, 2, 2, 1, 1, 1, 1];
        let bridge = vec![2, 2, 2, 1, 1, 1, 1, 1, 1, 1];
        let m = matrix(
            &["a", "b", "a2", "b2", "bridge", "x"],
            &[a.clone(), b.clone(), a, b, bridge, vec![9; 10]],
        );
        let sim = Simulation::permissive(&m, &[50.0, 10.0]).unwrap().with_chunk_size(1);
        let report = sim
            .run(&keys(&["a", "b", "a2", "b2", "bridge", "x"]))
            .unwrap();

        // b and b2 shared 2.1 and were renamed keeping no level
        assert_eq!(report.iterations, 3);
        assert_eq!(report.tracker.total, vec![2, 0]);
        assert_eq!(report.tracker.seed, vec![1, 0]);
        assert_eq!(report.tracker.post, vec![1, 0]);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let m = matrix(&["a"], &[vec![1; 4]]);
        let sim = Simulation::permissive(&m, &[10.0]).unwrap();
        assert!(matches!(sim.run(&keys(&["a", "zz"])), Err(NomenError::NotFound(_))));
    }
}
