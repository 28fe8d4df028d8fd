// config.rs - Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    // Input/Output
    pub profiles: Option<String>,
    pub metadata: Option<String>,
    pub state_dir: Option<String>,
    pub output_dir: Option<String>,

    // Nomenclature
    pub thresholds: Option<String>,
    pub prefix: Option<String>,
    pub merge_policy: Option<String>,
    pub policy_config: Option<String>,
    pub missing_char: Option<String>,

    // Quality control
    pub min_presence: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,

    // Performance
    pub threads: Option<usize>,

    // Sample/Loci filtering
    pub include_samples: Option<String>,
    pub exclude_samples: Option<String>,
    pub include_loci: Option<String>,
    pub exclude_loci: Option<String>,
    pub include_samples_list: Option<String>,
    pub exclude_samples_list: Option<String>,

    // Simulation
    pub simulate: Option<bool>,
    pub chunk_size: Option<usize>,
    pub matrix_cache: Option<String>,

    // Flags
    pub dry_run: Option<bool>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        println!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        println!("📄 Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Generate a sample configuration file with comments
    pub fn generate_sample() -> String {
        r#"# cgnomen.toml - Configuration file for cgnomen
# Command line arguments will override these settings

# =============================================================================
# INPUT/OUTPUT
# =============================================================================

# Path to allelic profile matrix (.tsv or .csv)
profiles = "/path/to/profiles.tsv"

# Sample metadata (TSV with key, length, upload_date, code, history columns)
metadata = "/path/to/metadata.tsv"

# State directory: tree, profile store, lock file and run logs live here
state_dir = "/path/to/nomenclature_state"

# Result tables (default: <state_dir>/results)
# output_dir = "results"

# =============================================================================
# NOMENCLATURE
# =============================================================================

# Distance thresholds in percent of shared loci, one per level
thresholds = "40,20,10,5,2.5,1,0.5"

# Prefix of published codes ("LMO1 - 1.2.3")
prefix = "LMO1"

# Merge policy: permissive (always join and merge) or margin
merge_policy = "permissive"

# Merge policy parameters (margin policy: margin, biased, squared)
# policy_config = "margin=0.2860411899,biased=true"

# Missing data character
missing_char = "-"

# =============================================================================
# QUALITY CONTROL
# =============================================================================

# Minimum fraction of called loci (rounded to 2 decimals before comparing)
min_presence = 0.95

# Accepted assembly length range in bases
# min_length = 2800000
# max_length = 3200000

# =============================================================================
# PERFORMANCE
# =============================================================================

# Number of threads (omit for auto-detection)
threads = 8

# =============================================================================
# SAMPLE/LOCI FILTERING
# =============================================================================

# Include only samples matching regex pattern
# include_samples = "pattern.*"

# Exclude samples matching regex pattern
# exclude_samples = "control.*"

# Include only loci matching regex pattern
# include_loci = "LMO.*"

# Exclude loci matching regex pattern
# exclude_loci = "deprecated.*"

# Include only samples listed in a file (one sample per line)
# include_samples_list = "samples.txt"

# Exclude samples listed in a file (one sample per line)
# exclude_samples_list = "exclude.txt"

# =============================================================================
# SIMULATION
# =============================================================================

# Replay arrival by upload date instead of naming
simulate = false

# Samples added per simulated run
chunk_size = 30

# Distance matrix cache (.lz4)
# matrix_cache = "distances.lz4"

# =============================================================================
# FLAGS
# =============================================================================

# Validate inputs without computation (dry run)
dry_run = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_config_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert_eq!(config.thresholds.as_deref(), Some("40,20,10,5,2.5,1,0.5"));
        assert_eq!(config.min_presence, Some(0.95));
        assert_eq!(config.chunk_size, Some(30));
        assert!(config.min_length.is_none());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cgnomen.toml");
        let config = Config {
            prefix: Some("SAL".into()),
            max_length: Some(5_000_000),
            ..Config::new()
        };
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.prefix.as_deref(), Some("SAL"));
        assert_eq!(loaded.max_length, Some(5_000_000));
    }
}
