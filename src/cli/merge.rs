// merge.rs - Merge configuration file with CLI arguments

use crate::cli::{Args, Config};

impl Args {
    /// Merge with configuration from file
    /// CLI arguments take precedence over config file values
    pub fn merge_with_config(mut self, config: Config) -> Self {
        // Input/Output
        if self.profiles.is_none() {
            self.profiles = config.profiles;
        }
        if self.metadata.is_none() {
            self.metadata = config.metadata;
        }
        if self.state_dir.is_none() {
            self.state_dir = config.state_dir;
        }
        if self.output_dir.is_none() {
            self.output_dir = config.output_dir;
        }

        // Nomenclature
        if self.thresholds.is_none() {
            self.thresholds = config.thresholds;
        }
        if self.prefix.is_none() {
            self.prefix = config.prefix;
        }
        if self.policy_config.is_none() {
            self.policy_config = config.policy_config;
        }
        // Only override defaults, not explicit CLI values
        if let Some(policy) = config.merge_policy {
            if self.merge_policy == "permissive" {
                self.merge_policy = policy;
            }
        }
        if let Some(missing_char) = config.missing_char {
            if self.missing_char == "-" {
                self.missing_char = missing_char;
            }
        }

        // Quality control
        if let Some(min_presence) = config.min_presence {
            if self.min_presence == 0.95 {
                self.min_presence = min_presence;
            }
        }
        if self.min_length.is_none() {
            self.min_length = config.min_length;
        }
        if self.max_length.is_none() {
            self.max_length = config.max_length;
        }

        // Performance
        if self.threads.is_none() {
            self.threads = config.threads;
        }

        // Sample/Loci filtering
        if self.include_samples.is_none() {
            self.include_samples = config.include_samples;
        }
        if self.exclude_samples.is_none() {
            self.exclude_samples = config.exclude_samples;
        }
        if self.include_loci.is_none() {
            self.include_loci = config.include_loci;
        }
        if self.exclude_loci.is_none() {
            self.exclude_loci = config.exclude_loci;
        }
        if self.include_samples_list.is_none() {
            self.include_samples_list = config.include_samples_list;
        }
        if self.exclude_samples_list.is_none() {
            self.exclude_samples_list = config.exclude_samples_list;
        }

        // Simulation
        if !self.simulate && config.simulate.unwrap_or(false) {
            self.simulate = true;
        }
        if let Some(chunk_size) = config.chunk_size {
            if self.chunk_size == 30 {
                self.chunk_size = chunk_size;
            }
        }
        if self.matrix_cache.is_none() {
            self.matrix_cache = config.matrix_cache;
        }

        // Flags (CLI flags take precedence, config only sets if not explicitly set)
        if !self.dry_run && config.dry_run.unwrap_or(false) {
            self.dry_run = true;
        }

        self
    }

    /// Load configuration and merge with CLI args
    pub fn with_config_file(self, config_path: &str) -> Result<Self, String> {
        let config = Config::from_file(config_path)?;
        Ok(self.merge_with_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["cgnomen"], args).unwrap()
    }

    #[test]
    fn test_cli_values_take_precedence() {
        let args = parse(&["--thresholds", "30,10", "--merge-policy", "margin"]);
        let config = Config {
            thresholds: Some("50,20".into()),
            merge_policy: Some("permissive".into()),
            prefix: Some("LMO1".into()),
            min_presence: Some(0.9),
            ..Config::new()
        };
        let merged = args.merge_with_config(config);
        assert_eq!(merged.thresholds.as_deref(), Some("30,10"));
        assert_eq!(merged.merge_policy, "margin");
        assert_eq!(merged.prefix.as_deref(), Some("LMO1"));
        assert_eq!(merged.min_presence, 0.9);
    }

    #[test]
    fn test_config_switches_apply() {
        let config = Config {
            simulate: Some(true),
            chunk_size: Some(10),
            ..Config::new()
        };
        let merged = parse(&[]).merge_with_config(config);
        assert!(merged.simulate);
        assert_eq!(merged.chunk_size, 10);
        assert!(!merged.dry_run);
    }
}
