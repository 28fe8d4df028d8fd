// mod.rs - Core logic module

pub mod distance;
pub mod history;
pub mod matrix;
pub mod name;
pub mod naming;
pub mod policy;
pub mod tree;

// Re-export main types for convenience
pub use distance::{checked_distance, distance, distances_to, presence_ratio, NO_OVERLAP_DISTANCE};
pub use history::{ChangeTracker, NameHistory, RenameEvent};
pub use matrix::DistanceMatrix;
pub use name::{Name, UNDEFINED};
pub use naming::{assign_name, Assignment, Namer, Thresholds};
pub use policy::{MarginOfErrorPolicy, MergePolicy, MergePolicyFactory, PermissivePolicy};
pub use tree::{NodeHandle, PublishedCode, Tree};
