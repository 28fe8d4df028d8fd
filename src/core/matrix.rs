// matrix.rs - Lower-triangular distance matrix cache

use crate::core::distance::distance;
use crate::error::{NomenError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixMetadata {
    pub version: String,
    pub created: String,
    pub entries: usize,
    pub format_version: u32,
}

#[derive(Serialize, Deserialize)]
struct MatrixFile {
    metadata: MatrixMetadata,
    keys: Vec<String>,
    rows: Vec<Vec<f64>>,
}

/// Pairwise distances keyed by sample, stored as a lower triangle.
///
/// Row `i` holds the distances from the `i`-th key to every earlier key.
#[derive(Debug, Clone, Default)]
pub struct DistanceMatrix {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Appends `key` with its distances to every key already present.
    pub fn add(&mut self, key: &str, distances: Vec<f64>) -> Result<()> {
        if self.index.contains_key(key) {
            return Err(NomenError::Integrity(format!(
                "'{}' is already in the distance matrix",
                key
            )));
        }
        if distances.len() != self.keys.len() {
            return Err(NomenError::Integrity(format!(
                "row for '{}' has {} distances, expected {}",
                key,
                distances.len(),
                self.keys.len()
            )));
        }
        self.index.insert(key.to_string(), self.keys.len());
        self.keys.push(key.to_string());
        self.rows.push(distances);
        Ok(())
    }

    fn position(&self, key: &str) -> Result<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| NomenError::NotFound(format!("'{}' is not in the distance matrix", key)))
    }

    pub fn get(&self, a: &str, b: &str) -> Result<f64> {
        let i = self.position(a)?;
        let j = self.position(b)?;
        if i == j {
            if a != b {
                return Err(NomenError::Integrity(format!(
                    "'{}' and '{}' share matrix index {}",
                    a, b, i
                )));
            }
            return Ok(0.0);
        }
        let (row, col) = if i > j { (i, j) } else { (j, i) };
        Ok(self.rows[row][col])
    }

    /// Distances from `key` to each of `others`, in order.
    pub fn distances_from<S: AsRef<str>>(&self, key: &str, others: &[S]) -> Result<Vec<f64>> {
        others.iter().map(|other| self.get(key, other.as_ref())).collect()
    }

    /// Computes the full triangle from profiles in parallel.
    pub fn from_profiles<P>(keys: &[String], profiles: &[P]) -> Result<Self>
    where
        P: AsRef<[i32]> + Sync,
    {
        if keys.len() != profiles.len() {
            return Err(NomenError::Config(format!(
                "{} keys given for {} profiles",
                keys.len(),
                profiles.len()
            )));
        }

        let n = keys.len();
        let total = n * n.saturating_sub(1) / 2;
        info!("🔄 Computing distance matrix ({} samples, {} comparisons)...", n, total);
        let start = Instant::now();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA: {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        let update_interval = std::cmp::max(1, total / 100);
        let counter = AtomicUsize::new(0);

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let row: Vec<f64> = (0..i)
                    .map(|j| distance(profiles[i].as_ref(), profiles[j].as_ref()))
                    .collect();
                let before = counter.fetch_add(i, Ordering::Relaxed);
                if (before + i) / update_interval != before / update_interval {
                    pb.set_position((before + i) as u64);
                }
                row
            })
            .collect();
        pb.finish_and_clear();

        let mut matrix = DistanceMatrix::new();
        for (key, row) in keys.iter().zip(rows) {
            matrix.add(key, row)?;
        }
        info!(
            "✅ Distance matrix computed in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(matrix)
    }

    /// Writes the matrix as lz4-compressed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = MatrixFile {
            metadata: MatrixMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                entries: self.keys.len(),
                format_version: 1,
            },
            keys: self.keys.clone(),
            rows: self.rows.clone(),
        };
        let data = serde_json::to_vec(&file)?;
        let compressed = lz4_flex::compress_prepend_size(&data);
        std::fs::write(path, &compressed).map_err(|e| NomenError::storage(path, e))?;
        info!(
            "💾 Distance matrix saved to {} ({} entries, {} KB)",
            path.display(),
            self.keys.len(),
            compressed.len() / 1024
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let compressed = std::fs::read(path).map_err(|e| NomenError::storage(path, e))?;
        let data = lz4_flex::decompress_size_prepended(&compressed)?;
        let file: MatrixFile = serde_json::from_slice(&data)?;
        if file.metadata.entries != file.keys.len() {
            return Err(NomenError::Integrity(format!(
                "matrix metadata lists {} entries but {} keys are stored",
                file.metadata.entries,
                file.keys.len()
            )));
        }
        if file.rows.len() != file.keys.len() {
            return Err(NomenError::Integrity(format!(
                "matrix file holds {} rows for {} keys",
                file.rows.len(),
                file.keys.len()
            )));
        }

        let mut matrix = DistanceMatrix::new();
        for (key, row) in file.keys.iter().zip(file.rows) {
            matrix.add(key, row)?;
        }
        info!("📂 Loaded distance matrix from {} ({} entries)", path.display(), matrix.len());
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DistanceMatrix {
        let mut m = DistanceMatrix::new();
        m.add("a", vec![]).unwrap();
        m.add("b", vec![10.0]).unwrap();
        m.add("c", vec![20.0, 30.0]).unwrap();
        m
    }

    #[test]
    fn test_lookup_is_symmetric() {
        let m = small();
        assert_eq!(m.get("a", "b").unwrap(), 10.0);
        assert_eq!(m.get("b", "a").unwrap(), 10.0);
        assert_eq!(m.get("c", "b").unwrap(), 30.0);
        assert_eq!(m.get("c", "c").unwrap(), 0.0);
        assert_eq!(m.distances_from("c", &["a", "b"]).unwrap(), vec![20.0, 30.0]);
    }

    #[test]
    fn test_integrity_errors() {
        let mut m = small();
        assert!(matches!(m.add("a", vec![1.0, 2.0, 3.0]), Err(NomenError::Integrity(_))));
        assert!(matches!(m.add("d", vec![1.0]), Err(NomenError::Integrity(_))));
        assert!(matches!(m.get("a", "zz"), Err(NomenError::NotFound(_))));
    }

    #[test]
    fn test_from_profiles() {
        let keys = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let profiles = vec![vec![1, 1, 1, 1], vec![1, 1, 2, 2], vec![0, 0, 0, 0]];
        let m = DistanceMatrix::from_profiles(&keys, &profiles).unwrap();
        assert_eq!(m.get("x", "y").unwrap(), 50.0);
        assert_eq!(m.get("x", "z").unwrap(), 100.0);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.lz4");
        let m = small();
        m.save(&path).unwrap();
        let loaded = DistanceMatrix::load(&path).unwrap();
        assert_eq!(loaded.keys(), m.keys());
        assert_eq!(loaded.get("a", "c").unwrap(), 20.0);
    }

    #[test]
    fn test_load_rejects_missing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.lz4");
        let m = small();
        let file = MatrixFile {
            metadata: MatrixMetadata {
                version: "test".to_string(),
                created: String::new(),
                entries: 3,
                format_version: 1,
            },
            keys: m.keys.clone(),
            rows: m.rows[..2].to_vec(),
        };
        let data = serde_json::to_vec(&file).unwrap();
        std::fs::write(&path, lz4_flex::compress_prepend_size(&data)).unwrap();

        assert!(matches!(DistanceMatrix::load(&path), Err(NomenError::Integrity(_))));
    }
}
