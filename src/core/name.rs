// name.rs - Hierarchical cluster address of a sample

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder for levels that could not be determined.
pub const UNDEFINED: i32 = -1;

/// Ordered cluster IDs, one per naming level (level 1 first).
///
/// Serialized as the dot-joined text form (`"1.2.3"`), which is also the
/// on-disk form of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(Vec<i32>);

impl Name {
    pub fn new(parts: Vec<i32>) -> Self {
        Name(parts)
    }

    pub fn with_capacity(depth: usize) -> Self {
        Name(Vec::with_capacity(depth))
    }

    pub fn parts(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, id: i32) {
        self.0.push(id);
    }

    /// Pads with `UNDEFINED` up to `depth`.
    pub fn fill_undefined(&mut self, depth: usize) {
        while self.0.len() < depth {
            self.0.push(UNDEFINED);
        }
    }

    /// True when no level holds the placeholder.
    pub fn is_resolved(&self) -> bool {
        self.0.iter().all(|&id| id > 0)
    }

    /// First `level` components.
    pub fn prefix(&self, level: usize) -> Name {
        Name(self.0[..level.min(self.0.len())].to_vec())
    }

    /// Number of leading components shared with `other`.
    pub fn common_prefix_len(&self, other: &Name) -> usize {
        self.0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Cluster ID at 1-based `level`.
    pub fn at_level(&self, level: usize) -> Option<i32> {
        level.checked_sub(1).and_then(|i| self.0.get(i).copied())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "{}", text.join("."))
    }
}

impl FromStr for Name {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Name::default());
        }
        trimmed
            .split('.')
            .map(|part| {
                part.trim()
                    .parse::<i32>()
                    .map_err(|_| format!("Invalid name component '{}' in '{}'", part, s))
            })
            .collect::<Result<Vec<i32>, String>>()
            .map(Name)
    }
}

impl TryFrom<String> for Name {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.to_string()
    }
}

impl From<Vec<i32>> for Name {
    fn from(parts: Vec<i32>) -> Self {
        Name(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form() {
        let name: Name = "1.2.3".parse().unwrap();
        assert_eq!(name.parts(), &[1, 2, 3]);
        assert_eq!(name.to_string(), "1.2.3");
        assert!(name.is_resolved());

        let partial: Name = "4.-1.-1".parse().unwrap();
        assert!(!partial.is_resolved());
        assert!("1.x".parse::<Name>().is_err());
    }

    #[test]
    fn test_json_form() {
        let name = Name::new(vec![3, 1, 7]);
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"3.1.7\"");
        let back: Name = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn test_prefix_helpers() {
        let a = Name::new(vec![1, 2, 3, 4]);
        let b = Name::new(vec![1, 2, 5, 4]);
        assert_eq!(a.common_prefix_len(&b), 2);
        assert_eq!(a.prefix(2), Name::new(vec![1, 2]));
        assert_eq!(a.at_level(1), Some(1));
        assert_eq!(a.at_level(0), None);

        let mut c = Name::new(vec![5]);
        c.fill_undefined(3);
        assert_eq!(c.parts(), &[5, UNDEFINED, UNDEFINED]);
    }
}
