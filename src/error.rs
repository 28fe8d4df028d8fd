// error.rs - Error types for the nomenclature engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the nomenclature engine and its persistence layers.
///
/// Algorithmic invariant violations inside the tree are not represented here:
/// those are defects and panic.
#[derive(Debug, Error)]
pub enum NomenError {
    /// Missing or invalid settings (thresholds, depth, policy parameters).
    #[error("configuration error: {0}")]
    Config(String),

    /// Persisted state disagrees with itself or with the authoritative source.
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// Lookup of an unknown key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A sample that already holds a resolved name was submitted for naming.
    #[error("sample '{0}' already has a name")]
    AlreadyNamed(String),

    /// Two profiles (or a profile and a store) disagree on locus count.
    #[error("profile length mismatch: expected {expected}, got {actual}")]
    ProfileLength { expected: usize, actual: usize },

    /// Another run holds the state directory.
    #[error("state directory is locked by another run: {}", .0.display())]
    Lock(PathBuf),

    /// Filesystem failure with path context.
    #[error("I/O error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding of persisted state failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NomenError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NomenError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for NomenError {
    fn from(e: serde_json::Error) -> Self {
        NomenError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for NomenError {
    fn from(e: bincode::Error) -> Self {
        NomenError::Serialization(e.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for NomenError {
    fn from(e: lz4_flex::block::DecompressError) -> Self {
        NomenError::Serialization(format!("lz4 decompression failed: {}", e))
    }
}

impl From<csv::Error> for NomenError {
    fn from(e: csv::Error) -> Self {
        NomenError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NomenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = NomenError::AlreadyNamed("S1".to_string());
        assert_eq!(e.to_string(), "sample 'S1' already has a name");

        let e = NomenError::ProfileLength {
            expected: 3,
            actual: 2,
        };
        assert!(e.to_string().contains("expected 3"));

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = NomenError::storage("/tmp/x", io);
        assert!(e.to_string().contains("/tmp/x"));
    }
}
