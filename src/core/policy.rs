// policy.rs - Pluggable merge/join acceptance policies

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default acceptance margin of the margin-of-error policy.
pub const DEFAULT_MARGIN: f64 = 0.2860411899;

/// Policy configuration, kept alongside results for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergePolicyConfig {
    pub policy_type: String,
    pub parameters: HashMap<String, String>,
}

/// Decides whether a sample may join (or bridge) clusters at one level.
///
/// `distances` are the distances from the new sample to every named member
/// of the candidate cluster(s); `threshold` is the level's cutoff.
pub trait MergePolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Lower is better; only meaningful relative to the same policy.
    fn cost(&self, distances: &[f64], threshold: f64) -> f64;

    fn accepts(&self, distances: &[f64], threshold: f64) -> bool;

    /// Whether `cost`/`accepts` look at the distances at all.
    fn needs_distances(&self) -> bool {
        true
    }

    fn get_config(&self) -> MergePolicyConfig;

    fn validate_config(config_str: &str) -> Result<(), String>
    where
        Self: Sized;
}

/// Always joins and always merges.
pub struct PermissivePolicy;

impl MergePolicy for PermissivePolicy {
    fn name(&self) -> &'static str {
        "permissive"
    }

    fn description(&self) -> &'static str {
        "Join or merge whenever any member is within the threshold"
    }

    fn cost(&self, _distances: &[f64], _threshold: f64) -> f64 {
        0.0
    }

    fn accepts(&self, _distances: &[f64], _threshold: f64) -> bool {
        true
    }

    fn needs_distances(&self) -> bool {
        false
    }

    fn get_config(&self) -> MergePolicyConfig {
        MergePolicyConfig {
            policy_type: self.name().to_string(),
            parameters: HashMap::new(),
        }
    }

    fn validate_config(config_str: &str) -> Result<(), String> {
        if config_str.trim().is_empty() {
            Ok(())
        } else {
            Err("permissive policy takes no parameters".to_string())
        }
    }
}

/// Mean threshold-excess of the cluster members.
///
/// Members within the threshold are skipped (biased) or count as zero;
/// members beyond it contribute their excess, squared if requested.
/// The cluster is accepted while the mean stays under `margin`.
pub struct MarginOfErrorPolicy {
    margin: f64,
    biased: bool,
    squared: bool,
}

impl MarginOfErrorPolicy {
    pub fn new(config: &str) -> Result<Self, String> {
        let params = MergePolicyFactory::parse_config(config);

        let margin = match params.get("margin") {
            Some(s) => s
                .parse::<f64>()
                .map_err(|_| format!("Invalid margin '{}'", s))?,
            None => DEFAULT_MARGIN,
        };
        let biased = match params.get("biased") {
            Some(s) => s
                .parse::<bool>()
                .map_err(|_| format!("Invalid biased flag '{}'", s))?,
            None => true,
        };
        let squared = match params.get("squared") {
            Some(s) => s
                .parse::<bool>()
                .map_err(|_| format!("Invalid squared flag '{}'", s))?,
            None => false,
        };

        if !margin.is_finite() || margin < 0.0 {
            return Err("margin must be a non-negative number".to_string());
        }

        Ok(Self {
            margin,
            biased,
            squared,
        })
    }
}

impl MergePolicy for MarginOfErrorPolicy {
    fn name(&self) -> &'static str {
        "margin"
    }

    fn description(&self) -> &'static str {
        "Accept while the mean distance excess over the threshold stays under a margin"
    }

    fn cost(&self, distances: &[f64], threshold: f64) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &d in distances {
            let err = threshold - d;
            if err >= 0.0 {
                if self.biased {
                    continue;
                }
                count += 1;
            } else if self.squared {
                sum += err * err;
                count += 1;
            } else {
                sum += err;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum.abs() / count as f64
        }
    }

    fn accepts(&self, distances: &[f64], threshold: f64) -> bool {
        self.cost(distances, threshold) < self.margin
    }

    fn get_config(&self) -> MergePolicyConfig {
        let mut parameters = HashMap::new();
        parameters.insert("margin".to_string(), self.margin.to_string());
        parameters.insert("biased".to_string(), self.biased.to_string());
        parameters.insert("squared".to_string(), self.squared.to_string());
        MergePolicyConfig {
            policy_type: self.name().to_string(),
            parameters,
        }
    }

    fn validate_config(config_str: &str) -> Result<(), String> {
        let params = MergePolicyFactory::parse_config(config_str);
        for key in params.keys() {
            if !matches!(key.as_str(), "margin" | "biased" | "squared") {
                return Err(format!("Unknown margin policy parameter '{}'", key));
            }
        }
        Ok(())
    }
}

pub struct MergePolicyFactory;

impl MergePolicyFactory {
    /// Create a merge policy by name and configuration string
    pub fn create(policy_type: &str, config: &str) -> Result<Box<dyn MergePolicy>, String> {
        match policy_type {
            "permissive" => {
                PermissivePolicy::validate_config(config)?;
                Ok(Box::new(PermissivePolicy))
            }
            "margin" => {
                MarginOfErrorPolicy::validate_config(config)?;
                Ok(Box::new(MarginOfErrorPolicy::new(config)?))
            }
            _ => Err(format!(
                "Unknown merge policy: {} (available: {})",
                policy_type,
                Self::list_available()
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    pub fn list_available() -> Vec<(&'static str, &'static str)> {
        vec![
            ("permissive", "Always join and merge (production behaviour)"),
            ("margin", "Mean threshold-excess cost with an acceptance margin"),
        ]
    }

    pub fn default() -> Box<dyn MergePolicy> {
        Box::new(PermissivePolicy)
    }

    /// Parse "key=value,key=value" into a map
    pub fn parse_config(config_str: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        if config_str.is_empty() {
            return config;
        }

        for pair in config_str.split(',') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() == 2 {
                config.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let config = MergePolicyFactory::parse_config("margin=0.5,squared=true");
        assert_eq!(config.get("margin"), Some(&"0.5".to_string()));
        assert_eq!(config.get("squared"), Some(&"true".to_string()));
        assert!(MergePolicyFactory::parse_config("").is_empty());
    }

    #[test]
    fn test_factory() {
        assert_eq!(MergePolicyFactory::create("permissive", "").unwrap().name(), "permissive");
        assert_eq!(MergePolicyFactory::create("margin", "margin=1.0").unwrap().name(), "margin");
        assert!(MergePolicyFactory::create("margin", "bogus=1").is_err());
        assert!(MergePolicyFactory::create("margin", "margin=-1").is_err());
        assert!(MergePolicyFactory::create("nope", "").is_err());
        assert!(MergePolicyFactory::list_available().len() >= 2);
    }

    #[test]
    fn test_margin_cost_biased() {
        let policy = MarginOfErrorPolicy::new("").unwrap();
        // within-threshold members are skipped; excess = (-1 + -0.5) / 2
        assert!((policy.cost(&[5.0, 11.0, 10.5], 10.0) - 0.75).abs() < 1e-12);
        assert_eq!(policy.cost(&[1.0, 2.0], 10.0), 0.0);
        assert!(policy.accepts(&[10.2], 10.0));
        assert!(!policy.accepts(&[10.5], 10.0));
    }

    #[test]
    fn test_margin_cost_unbiased_squared() {
        let policy = MarginOfErrorPolicy::new("biased=false,squared=true").unwrap();
        // (0 + 1 + 0.25) / 3
        let cost = policy.cost(&[5.0, 11.0, 10.5], 10.0);
        assert!((cost - 1.25 / 3.0).abs() < 1e-12);
        assert_eq!(policy.cost(&[], 10.0), 0.0);
    }

    #[test]
    fn test_permissive_always_accepts() {
        let policy = PermissivePolicy;
        assert!(policy.accepts(&[100.0], 0.0));
        assert_eq!(policy.get_config().policy_type, "permissive");
    }
}
