// lib.rs - cgnomen library root

//! # cgnomen - Incremental hierarchical cgMLST nomenclature
//!
//! Assigns stable, hierarchical cluster codes (`1.4.2.7`) to bacterial samples
//! from their cgMLST allelic profiles. Samples are named incrementally as they
//! arrive; previously issued codes change only when a new sample bridges two
//! existing clusters and they merge.
//!
//! ## Features
//!
//! - **Incremental naming**: one threshold per level, top-down assignment
//! - **Deterministic merges**: survivor is the cluster with most named samples, lowest ID on ties
//! - **Persistent state**: JSON tree plus an lz4-compressed allele-call store
//! - **Quality control**: presence ratio and assembly length checks
//! - **Stability tooling**: arrival simulation and a parallel threshold sweep
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use cgnomen::prelude::*;
//!
//! let mut tree = Tree::new(2);
//! let namer = Namer::permissive(Thresholds::new(vec![50.0, 10.0])?);
//!
//! let named: Vec<String> = Vec::new();
//! let first = namer.assign(&mut tree, &named, "S1", &[], true)?;
//! assert_eq!(first.name.to_string(), "1.1");
//!
//! let named = vec!["S1".to_string()];
//! let d = distance(&[1, 2, 3, 4], &[1, 2, 3, 5]);
//! let second = namer.assign(&mut tree, &named, "S2", &[d], true)?;
//! println!("S2 -> {}", second.name);
//! # Ok::<(), cgnomen::NomenError>(())
//! ```

// Re-export all main modules
pub mod cli;
pub mod core;
pub mod data;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;

// Convenience prelude for common imports
pub mod prelude {
    pub use crate::cli::{validate_args, Args, ValidationResult};
    pub use crate::core::{assign_name, distance, distances_to, presence_ratio};
    pub use crate::core::{Assignment, DistanceMatrix, Name, Namer, Thresholds, Tree, UNDEFINED};
    pub use crate::core::{MergePolicy, MergePolicyFactory};
    pub use crate::data::{AllelicMatrix, AllelicProfile, DatabaseEntry, EntryStore};
    pub use crate::data::{MemoryEntryStore, ProfileStore, QcSettings};
    pub use crate::error::{NomenError, Result};
    pub use crate::pipeline::{Calculator, CalculatorConfig, RunReport, Simulation};
}

// Re-export main types at the root level for convenience
pub use cli::{Args, ValidationResult};
pub use core::{Name, Namer, Thresholds, Tree};
pub use data::{AllelicMatrix, AllelicProfile, ProfileStore};
pub use error::{NomenError, Result};
pub use pipeline::{Calculator, CalculatorConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_info() -> String {
    format!(
        "cgnomen v{} - Incremental hierarchical cgMLST nomenclature",
        VERSION
    )
}
