// mod.rs - Input file loaders

pub mod csv;
pub mod metadata;
pub mod tsv;

pub use metadata::load_metadata;
