// sweep.rs - Threshold grid search over simulated runs

use crate::core::matrix::DistanceMatrix;
use crate::error::{NomenError, Result};
use crate::pipeline::simulation::Simulation;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Candidate values for one naming level.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelSpec {
    /// Explicit values, e.g. `20,25,30`
    List(Vec<f64>),
    /// Half-open range `start:end`, stepped by the grid step
    Range { start: f64, end: f64 },
}

impl FromStr for LevelSpec {
    type Err = NomenError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |text: &str| {
            text.trim()
                .parse::<f64>()
                .map_err(|_| NomenError::Config(format!("invalid threshold value '{}'", text.trim())))
        };
        if let Some((start, end)) = s.split_once(':') {
            let (start, end) = (parse(start)?, parse(end)?);
            if end <= start {
                return Err(NomenError::Config(format!("empty threshold range '{}'", s)));
            }
            Ok(LevelSpec::Range { start, end })
        } else {
            let values = s
                .split(',')
                .filter(|v| !v.trim().is_empty())
                .map(parse)
                .collect::<Result<Vec<f64>>>()?;
            if values.is_empty() {
                return Err(NomenError::Config("empty threshold list".to_string()));
            }
            Ok(LevelSpec::List(values))
        }
    }
}

/// Per-level candidate sets; the sweep runs their cartesian product.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepGrid {
    levels: Vec<LevelSpec>,
    step: f64,
}

impl SweepGrid {
    pub fn new(levels: Vec<LevelSpec>, step: f64) -> Result<Self> {
        if levels.is_empty() {
            return Err(NomenError::Config("no sweep levels given".to_string()));
        }
        let has_range = levels.iter().any(|l| matches!(l, LevelSpec::Range { .. }));
        if has_range && !(step.is_finite() && step > 0.0) {
            return Err(NomenError::Config(format!("invalid sweep step {}", step)));
        }
        Ok(Self { levels, step })
    }

    /// Parses levels separated by `;`, e.g. `"40:60;20,25;5:10"`.
    pub fn parse(levels: &str, step: f64) -> Result<Self> {
        let levels = levels
            .split(';')
            .filter(|l| !l.trim().is_empty())
            .map(LevelSpec::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(levels, step)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Values tried at `level` (0-based).
    pub fn values(&self, level: usize) -> Vec<f64> {
        match &self.levels[level] {
            LevelSpec::List(values) => values.clone(),
            LevelSpec::Range { start, end } => {
                let mut out = Vec::new();
                let mut k = 0u32;
                loop {
                    let value = round6(start + k as f64 * self.step);
                    if value >= *end - 1e-9 {
                        break;
                    }
                    out.push(value);
                    k += 1;
                }
                out
            }
        }
    }

    /// Number of candidates in the product.
    pub fn len(&self) -> usize {
        (0..self.depth()).map(|l| self.values(l).len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazily enumerates the cartesian product, last level varying fastest.
    pub fn candidates(&self) -> Candidates {
        let values: Vec<Vec<f64>> = (0..self.depth()).map(|l| self.values(l)).collect();
        let done = values.iter().any(|v| v.is_empty());
        Candidates {
            indices: vec![0; values.len()],
            values,
            done,
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

pub struct Candidates {
    values: Vec<Vec<f64>>,
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Candidates {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Vec<f64>> {
        if self.done {
            return None;
        }
        let current: Vec<f64> = self
            .indices
            .iter()
            .zip(&self.values)
            .map(|(&i, values)| values[i])
            .collect();

        self.done = true;
        for level in (0..self.indices.len()).rev() {
            self.indices[level] += 1;
            if self.indices[level] < self.values[level].len() {
                self.done = false;
                break;
            }
            self.indices[level] = 0;
        }
        Some(current)
    }
}

/// One finished candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    /// Thresholds as simulated, loosest first
    pub thresholds: Vec<f64>,
    pub total_changes: usize,
    pub changes_by_depth: Vec<usize>,
}

/// Sent by workers to the coordinator.
#[derive(Debug)]
pub enum WorkerMessage {
    RequestNext { worker: usize },
    Result { worker: usize, result: SweepResult },
    Failed { worker: usize, thresholds: Vec<f64>, reason: String },
    Done { worker: usize },
}

/// Sent by the coordinator to one worker.
#[derive(Debug)]
pub enum ServerMessage {
    Candidate(Vec<f64>),
    Done,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub workers: usize,
    pub chunk_size: usize,
    /// Wall-clock budget; no new candidates are handed out once it is spent
    pub deadline: Option<std::time::Duration>,
}

/// Totals of a finished sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: bool,
    pub best: Option<SweepResult>,
}

/// Runs every candidate of `grid`, streaming results to `sink` on a writer thread.
///
/// Workers pull candidates one at a time from the coordinator (the calling
/// thread). A panicking simulation is reported as failed and the worker
/// carries on with a fresh simulation.
pub fn run_sweep<F>(
    grid: &SweepGrid,
    matrix: Arc<DistanceMatrix>,
    order: Arc<Vec<String>>,
    config: &SweepConfig,
    mut sink: F,
) -> Result<SweepSummary>
where
    F: FnMut(&SweepResult) -> Result<()> + Send + 'static,
{
    let start = Instant::now();
    let workers = config.workers.max(1);
    info!(
        "🚀 Sweeping {} threshold candidates with {} workers",
        grid.len(),
        workers
    );

    let (to_server, from_workers) = unbounded::<WorkerMessage>();
    let (to_writer, writer_inbox) = unbounded::<SweepResult>();

    let writer = thread::spawn(move || -> Result<usize> {
        let mut written = 0;
        while let Ok(result) = writer_inbox.recv() {
            sink(&result)?;
            written += 1;
        }
        Ok(written)
    });

    let mut inboxes: Vec<Sender<ServerMessage>> = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let (to_worker, inbox) = bounded::<ServerMessage>(1);
        inboxes.push(to_worker);
        let outbox = to_server.clone();
        let matrix = Arc::clone(&matrix);
        let order = Arc::clone(&order);
        let chunk_size = config.chunk_size;
        handles.push(thread::spawn(move || {
            worker_loop(worker, &matrix, &order, chunk_size, &inbox, &outbox)
        }));
    }
    drop(to_server);

    let mut candidates = grid.candidates();
    let mut summary = SweepSummary::default();
    let mut active = workers;

    while active > 0 {
        let message = match from_workers.recv() {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            WorkerMessage::RequestNext { worker } => {
                let expired = config.deadline.map_or(false, |d| start.elapsed() >= d);
                if expired && !summary.timed_out {
                    warn!("⏰ Sweep time budget spent, stopping after running candidates");
                    summary.timed_out = true;
                }
                let reply = match candidates.next() {
                    Some(candidate) if !expired => ServerMessage::Candidate(candidate),
                    _ => ServerMessage::Done,
                };
                if inboxes[worker].send(reply).is_err() {
                    warn!("Worker {} stopped listening", worker);
                }
            }
            WorkerMessage::Result { worker, result } => {
                debug!(
                    "Worker {} finished {:?}: {} changes",
                    worker, result.thresholds, result.total_changes
                );
                summary.completed += 1;
                let better = summary
                    .best
                    .as_ref()
                    .map_or(true, |best| result.total_changes < best.total_changes);
                if better {
                    summary.best = Some(result.clone());
                }
                if to_writer.send(result).is_err() {
                    error!("Result writer stopped early");
                }
            }
            WorkerMessage::Failed {
                worker,
                thresholds,
                reason,
            } => {
                error!("❌ Worker {} failed on {:?}: {}", worker, thresholds, reason);
                summary.failed += 1;
            }
            WorkerMessage::Done { worker } => {
                debug!("Worker {} done", worker);
                active -= 1;
            }
        }
    }
    drop(inboxes);
    drop(to_writer);

    for handle in handles {
        if handle.join().is_err() {
            error!("A sweep worker thread panicked outside a simulation");
        }
    }
    let written = writer
        .join()
        .map_err(|_| NomenError::Serialization("result writer thread panicked".to_string()))??;

    info!(
        "✅ Sweep finished in {:.2}s: {} completed ({} written), {} failed",
        start.elapsed().as_secs_f64(),
        summary.completed,
        written,
        summary.failed
    );
    Ok(summary)
}

fn worker_loop(
    worker: usize,
    matrix: &DistanceMatrix,
    order: &[String],
    chunk_size: usize,
    inbox: &Receiver<ServerMessage>,
    outbox: &Sender<WorkerMessage>,
) {
    loop {
        if outbox.send(WorkerMessage::RequestNext { worker }).is_err() {
            return;
        }
        let thresholds = match inbox.recv() {
            Ok(ServerMessage::Candidate(thresholds)) => thresholds,
            Ok(ServerMessage::Done) | Err(_) => break,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            Simulation::permissive(matrix, &thresholds)
                .map(|sim| sim.with_chunk_size(chunk_size))
                .and_then(|sim| sim.run(order))
        }));
        let message = match outcome {
            Ok(Ok(report)) => WorkerMessage::Result {
                worker,
                result: SweepResult {
                    total_changes: report.total_changes(),
                    changes_by_depth: report.tracker.total.clone(),
                    thresholds: report.thresholds,
                },
            },
            Ok(Err(e)) => WorkerMessage::Failed {
                worker,
                thresholds,
                reason: e.to_string(),
            },
            Err(payload) => WorkerMessage::Failed {
                worker,
                thresholds,
                reason: panic_message(payload.as_ref()),
            },
        };
        if outbox.send(message).is_err() {
            return;
        }
    }
    let _ = outbox.send(WorkerMessage::Done { worker });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panic: {}", text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panic: {}", text)
    } else {
        "panic with unknown payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_level_spec_parsing() {
        assert_eq!(
            "1:2".parse::<LevelSpec>().unwrap(),
            LevelSpec::Range { start: 1.0, end: 2.0 }
        );
        assert_eq!(
            "5, 10".parse::<LevelSpec>().unwrap(),
            LevelSpec::List(vec![5.0, 10.0])
        );
        assert!("2:1".parse::<LevelSpec>().is_err());
        assert!("a".parse::<LevelSpec>().is_err());
    }

    #[test]
    fn test_ranges_exclude_end() {
        let grid = SweepGrid::parse("0.1:0.4", 0.1).unwrap();
        assert_eq!(grid.values(0), vec![0.1, 0.2, 0.3]);
        assert!(SweepGrid::parse("0:1", 0.0).is_err());
    }

    #[test]
    fn test_candidates_are_cartesian_product() {
        let grid = SweepGrid::parse("40,50;5:15", 5.0).unwrap();
        let all: Vec<Vec<f64>> = grid.candidates().collect();
        assert_eq!(grid.len(), 4);
        assert_eq!(
            all,
            vec![
                vec![40.0, 5.0],
                vec![40.0, 10.0],
                vec![50.0, 5.0],
                vec![50.0, 10.0]
            ]
        );
    }

    #[test]
    fn test_sweep_collects_every_candidate() {
        let keys: Vec<String> = (0..8).map(|i| format!("s{}", i)).collect();
        let profiles: Vec<Vec<i32>> = (0..8)
            .map(|i| (0..10).map(|l| if l < i { 2 } else { 1 }).collect())
            .collect();
        let matrix = Arc::new(DistanceMatrix::from_profiles(&keys, &profiles).unwrap());
        let grid = SweepGrid::parse("40,60;5:25", 10.0).unwrap();

        let rows = Arc::new(Mutex::new(Vec::new()));
        let sink_rows = Arc::clone(&rows);
        let summary = run_sweep(
            &grid,
            matrix,
            Arc::new(keys),
            &SweepConfig {
                workers: 3,
                chunk_size: 2,
                deadline: None,
            },
            move |result| {
                sink_rows.lock().unwrap().push(result.thresholds.clone());
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 0);
        assert!(!summary.timed_out);
        assert!(summary.best.is_some());
        let mut seen = rows.lock().unwrap().clone();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(
            seen,
            vec![
                vec![40.0, 5.0],
                vec![40.0, 15.0],
                vec![60.0, 5.0],
                vec![60.0, 15.0]
            ]
        );
    }

    #[test]
    fn test_bad_candidate_is_reported_not_fatal() {
        let keys = vec!["a".to_string(), "b".to_string()];
        let matrix = Arc::new(DistanceMatrix::from_profiles(&keys, &[vec![1, 1], vec![1, 2]]).unwrap());
        let grid = SweepGrid::new(vec![LevelSpec::List(vec![150.0, 20.0])], 1.0).unwrap();
        let summary = run_sweep(
            &grid,
            matrix,
            Arc::new(keys),
            &SweepConfig {
                workers: 1,
                chunk_size: 1,
                deadline: None,
            },
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_spent_deadline_stops_handing_out_work() {
        let keys = vec!["a".to_string()];
        let matrix = Arc::new(DistanceMatrix::from_profiles(&keys, &[vec![1, 1]]).unwrap());
        let grid = SweepGrid::parse("10,20,30", 1.0).unwrap();
        let summary = run_sweep(
            &grid,
            matrix,
            Arc::new(keys),
            &SweepConfig {
                workers: 2,
                chunk_size: 1,
                deadline: Some(std::time::Duration::ZERO),
            },
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(summary.completed, 0);
        assert!(summary.timed_out);
    }
}
