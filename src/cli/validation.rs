// validation.rs - Input validation utilities

use crate::cli::args::{Args, SweepArgs};
use crate::core::naming::Thresholds;
use crate::core::policy::MergePolicyFactory;
use crate::data::qc::QcSettings;
use crate::pipeline::sweep::SweepGrid;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

pub struct ValidationResult {
    pub thresholds: Thresholds,
    pub qc: QcSettings,
    pub state_dir: Option<PathBuf>,
    pub sample_include_regex: Option<Regex>,
    pub sample_exclude_regex: Option<Regex>,
    pub loci_include_regex: Option<Regex>,
    pub loci_exclude_regex: Option<Regex>,
    pub samples_include_set: Option<HashSet<String>>,
    pub samples_exclude_set: Option<HashSet<String>>,
}

/// Settings of a threshold sweep after validation.
pub struct SweepValidation {
    pub grid: SweepGrid,
    pub qc: QcSettings,
    pub workers: usize,
    pub deadline: Option<std::time::Duration>,
}

/// Validate all command line arguments
pub fn validate_args(args: &Args) -> Result<ValidationResult, String> {
    if args.profiles.is_none() {
        return Err("--profiles is required (or set 'profiles' in the config file)".to_string());
    }

    let thresholds = args
        .thresholds
        .as_deref()
        .ok_or("--thresholds is required (or set 'thresholds' in the config file)")?
        .parse::<Thresholds>()
        .map_err(|e| e.to_string())?;

    let state_dir = args.state_dir.as_ref().map(PathBuf::from);
    if state_dir.is_none() && !args.simulate && !args.stats_only {
        return Err("--state-dir is required unless --simulate or --stats-only is given".to_string());
    }

    // Validate merge policy
    MergePolicyFactory::create(&args.merge_policy, args.policy_config.as_deref().unwrap_or(""))?;

    if args.chunk_size == 0 {
        return Err("--chunk-size must be at least 1".to_string());
    }

    let qc = qc_settings(args.min_presence, args.min_length, args.max_length)?;

    // Compile regex patterns
    let sample_include_regex = compile(&args.include_samples, "include_samples")?;
    let sample_exclude_regex = compile(&args.exclude_samples, "exclude_samples")?;
    let loci_include_regex = compile(&args.include_loci, "include_loci")?;
    let loci_exclude_regex = compile(&args.exclude_loci, "exclude_loci")?;

    // Load filter sets from files
    let samples_include_set = match &args.include_samples_list {
        Some(file_path) => Some(load_set_from_file(file_path)?),
        None => None,
    };
    let samples_exclude_set = match &args.exclude_samples_list {
        Some(file_path) => Some(load_set_from_file(file_path)?),
        None => None,
    };

    Ok(ValidationResult {
        thresholds,
        qc,
        state_dir,
        sample_include_regex,
        sample_exclude_regex,
        loci_include_regex,
        loci_exclude_regex,
        samples_include_set,
        samples_exclude_set,
    })
}

/// Validate the sweep command line
pub fn validate_sweep_args(args: &SweepArgs) -> Result<SweepValidation, String> {
    let grid = SweepGrid::parse(&args.levels, args.step).map_err(|e| e.to_string())?;
    if grid.is_empty() {
        return Err(format!("--levels '{}' yields no candidates", args.levels));
    }
    if args.chunk_size == 0 {
        return Err("--chunk-size must be at least 1".to_string());
    }

    let qc = qc_settings(args.min_presence, args.min_length, args.max_length)?;

    let workers = match args.workers {
        Some(0) => return Err("--workers must be at least 1".to_string()),
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1),
    };

    let deadline = match args.max_hours {
        Some(hours) if !(hours.is_finite() && hours > 0.0) => {
            return Err("--max-hours must be a positive number".to_string())
        }
        Some(hours) => Some(std::time::Duration::from_secs_f64(hours * 3600.0)),
        None => None,
    };

    Ok(SweepValidation {
        grid,
        qc,
        workers,
        deadline,
    })
}

fn qc_settings(
    min_presence: f64,
    min_length: Option<u64>,
    max_length: Option<u64>,
) -> Result<QcSettings, String> {
    if !(0.0..=1.0).contains(&min_presence) {
        return Err("Minimum presence must be between 0.0 and 1.0".to_string());
    }
    let length_range = match (min_length, max_length) {
        (None, None) => None,
        (Some(min), Some(max)) if min > max => {
            return Err(format!("Length range is empty ({} > {})", min, max))
        }
        (min, max) => Some((min.unwrap_or(0), max.unwrap_or(u64::MAX))),
    };
    Ok(QcSettings {
        min_presence,
        length_range,
    })
}

fn compile(pattern: &Option<String>, name: &str) -> Result<Option<Regex>, String> {
    match pattern {
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|e| format!("Invalid {} regex: {}", name, e)),
        None => Ok(None),
    }
}

/// Load a set of strings from a file (one per line)
fn load_set_from_file(file_path: &str) -> Result<HashSet<String>, String> {
    let file = File::open(file_path)
        .map_err(|e| format!("Failed to open filter file '{}': {}", file_path, e))?;

    let reader = BufReader::new(file);
    let mut set = HashSet::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            format!("Failed to read line {} from '{}': {}", line_num + 1, file_path, e)
        })?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            set.insert(trimmed.to_string());
        }
    }

    println!("📋 Loaded {} items from filter file '{}'", set.len(), file_path);
    Ok(set)
}
