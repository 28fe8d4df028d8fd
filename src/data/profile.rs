// profile.rs - Allelic profile and matrix data structures

use log::info;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Allele value meaning "no call".
pub const MISSING_ALLELE: i32 = 0;

/// Non-numeric chewBBACA classifications, all read as missing.
const CHEWBBACA_TAGS: &[&str] = &[
    "LNF", "PLOT3", "PLOT5", "LOTSC", "NIPH", "NIPHEM", "ALM", "ASM", "PAMA", "EXC",
];

/// Represents a single sample's allelic profile
#[derive(Debug, Clone, PartialEq)]
pub struct AllelicProfile {
    pub sample_id: String,
    /// One allele per locus, in matrix column order; 0 = no call
    pub calls: Vec<i32>,
}

impl AllelicProfile {
    pub fn present_loci(&self) -> usize {
        self.calls.iter().filter(|&&a| a != MISSING_ALLELE).count()
    }
}

impl AsRef<[i32]> for AllelicProfile {
    fn as_ref(&self) -> &[i32] {
        &self.calls
    }
}

/// Collection of allelic profiles sharing one locus ordering
#[derive(Debug, Clone, Default)]
pub struct AllelicMatrix {
    pub samples: Vec<AllelicProfile>,
    pub loci_names: Vec<String>,
}

/// Reads one allele call.
///
/// Integers are kept as is, `INF-<n>` becomes `<n>`, missing markers and
/// chewBBACA tags become [`MISSING_ALLELE`]. Values outside the positive
/// `i32` range (hash-named alleles) are folded into it with CRC32.
pub fn parse_allele(token: &str, missing_char: &str) -> i32 {
    let cleaned = token.trim();
    if cleaned.is_empty() || cleaned == "NA" || cleaned == "?" || cleaned == missing_char {
        return MISSING_ALLELE;
    }
    if CHEWBBACA_TAGS.contains(&cleaned) {
        return MISSING_ALLELE;
    }

    let numeric = cleaned.strip_prefix("INF-").unwrap_or(cleaned);
    match numeric.parse::<i64>() {
        Ok(value) if value > 0 && value <= i32::MAX as i64 => value as i32,
        Ok(value) if value <= 0 => MISSING_ALLELE,
        Ok(_) => fold_hash(numeric),
        Err(_) if numeric.chars().all(|c| c.is_ascii_hexdigit()) && numeric.len() >= 8 => {
            fold_hash(numeric)
        }
        Err(_) => MISSING_ALLELE,
    }
}

/// Maps arbitrary allele text to a stable positive `i32`.
fn fold_hash(text: &str) -> i32 {
    let crc = crc32fast::hash(text.as_bytes());
    ((crc & 0x7fff_ffff) as i32).max(1)
}

impl AllelicMatrix {
    /// Create a new empty matrix
    pub fn new() -> Self {
        Self::default()
    }

    /// Load matrix from a `.tsv` or `.csv` file
    pub fn from_file(file_path: &Path, missing_char: &str) -> Result<Self, String> {
        info!("📊 Loading allelic matrix: {}", file_path.display());

        let extension = file_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("tsv");

        match extension {
            "csv" => Self::from_csv(file_path, missing_char),
            _ => Self::from_tsv(file_path, missing_char),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample filtering function
    pub fn apply_sample_filtering(
        &mut self,
        sample_include: Option<&Regex>,
        sample_exclude: Option<&Regex>,
        samples_include: Option<&HashSet<String>>,
        samples_exclude: Option<&HashSet<String>>,
    ) -> Result<(), String> {
        let initial_samples = self.samples.len();

        if sample_include.is_none()
            && sample_exclude.is_none()
            && samples_include.is_none()
            && samples_exclude.is_none()
        {
            return Ok(());
        }

        self.samples.retain(|sample| {
            let sample_id = &sample.sample_id;

            if let Some(regex) = sample_include {
                if !regex.is_match(sample_id) {
                    return false;
                }
            }
            if let Some(regex) = sample_exclude {
                if regex.is_match(sample_id) {
                    return false;
                }
            }
            if let Some(set) = samples_include {
                if !set.contains(sample_id) {
                    return false;
                }
            }
            if let Some(set) = samples_exclude {
                if set.contains(sample_id) {
                    return false;
                }
            }
            true
        });

        let filtered_samples = self.samples.len();
        if initial_samples != filtered_samples {
            info!(
                "Sample filters: kept {} samples (removed {})",
                filtered_samples,
                initial_samples - filtered_samples
            );
        }
        if filtered_samples == 0 {
            return Err("No samples remain after filtering".to_string());
        }
        Ok(())
    }

    /// Keep only the loci passing the regex/list filters
    pub fn apply_loci_filtering(
        &mut self,
        loci_include: Option<&Regex>,
        loci_exclude: Option<&Regex>,
    ) -> Result<(), String> {
        if loci_include.is_none() && loci_exclude.is_none() {
            return Ok(());
        }

        let keep: Vec<usize> = self
            .loci_names
            .iter()
            .enumerate()
            .filter(|(_, locus)| loci_include.map_or(true, |r| r.is_match(locus)))
            .filter(|(_, locus)| loci_exclude.map_or(true, |r| !r.is_match(locus)))
            .map(|(i, _)| i)
            .collect();

        if keep.is_empty() {
            return Err("No loci remain after filtering".to_string());
        }
        let before = self.loci_names.len();
        self.loci_names = keep.iter().map(|&i| self.loci_names[i].clone()).collect();
        self.samples.par_iter_mut().for_each(|sample| {
            sample.calls = keep.iter().map(|&i| sample.calls[i]).collect();
        });
        info!(
            "Loci filters: kept {} loci (removed {})",
            self.loci_names.len(),
            before - self.loci_names.len()
        );
        Ok(())
    }

    /// Print matrix statistics
    pub fn print_matrix_statistics(&self, phase: &str) {
        info!("📊 === MATRIX STATISTICS ({}) ===", phase);
        let total_cells = self.samples.len() * self.loci_names.len();
        if total_cells == 0 {
            info!("  📏 Empty matrix");
            return;
        }

        let missing: usize = self
            .samples
            .par_iter()
            .map(|sample| sample.calls.len() - sample.present_loci())
            .sum();
        let complete_samples = self
            .samples
            .iter()
            .filter(|s| s.present_loci() == s.calls.len())
            .count();
        let global_missing_percent = 100.0 * missing as f64 / total_cells as f64;

        info!(
            "  📏 Dimensions: {} samples × {} loci = {} total cells",
            self.samples.len(),
            self.loci_names.len(),
            total_cells
        );
        let verdict = if global_missing_percent <= 5.0 {
            "🟢 EXCELLENT: Very low missing data"
        } else if global_missing_percent <= 15.0 {
            "🟡 GOOD: Acceptable missing data"
        } else if global_missing_percent <= 30.0 {
            "🟠 FAIR: High missing data"
        } else {
            "🔴 POOR: Very high missing data"
        };
        info!(
            "  📊 Missing data: {:.2}% ({} cells)  {}",
            global_missing_percent, missing, verdict
        );
        info!(
            "  ✅ Complete samples: {} ({:.1}%)",
            complete_samples,
            100.0 * complete_samples as f64 / self.samples.len() as f64
        );
    }
}
