// mod.rs - Data structures module

pub mod entry;
pub mod loaders;
pub mod profile;
pub mod qc;
pub mod store;

// Re-export main types for convenience
pub use entry::{DatabaseEntry, EntryMetadata, EntryStore, MemoryEntryStore};
pub use loaders::load_metadata;
pub use profile::{parse_allele, AllelicMatrix, AllelicProfile, MISSING_ALLELE};
pub use qc::{QcFailure, QcReason, QcSettings};
pub use store::{ProfileStore, StoreMetadata};
