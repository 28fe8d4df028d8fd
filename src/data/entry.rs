// entry.rs - Sample records and the record-system interface

use crate::data::profile::AllelicMatrix;
use crate::data::qc::QcFailure;
use crate::error::{NomenError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// One sample as seen by the calculator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseEntry {
    pub key: String,
    /// Allele calls; `None` when the sample has not been called yet
    pub calls: Option<Vec<i32>>,
    /// Assembly length in bases
    pub length: Option<u64>,
    pub upload_date: Option<NaiveDate>,
    /// Currently published code
    pub code: Option<String>,
    /// Code change log, oldest first
    pub history: Vec<String>,
}

impl DatabaseEntry {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }
}

/// Metadata columns attached to a sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMetadata {
    pub length: Option<u64>,
    pub upload_date: Option<NaiveDate>,
    pub code: Option<String>,
    pub history: Vec<String>,
}

/// Host record system holding samples and their published codes.
pub trait EntryStore {
    /// Entries in processing order.
    fn entries(&self) -> Vec<&DatabaseEntry>;

    fn entry(&self, key: &str) -> Option<&DatabaseEntry>;

    fn write_code(&mut self, key: &str, code: &str) -> Result<()>;

    fn append_history(&mut self, key: &str, line: &str) -> Result<()>;

    /// Replaces the code of a sample that failed QC with the failure marker.
    fn mark_failed_qc(&mut self, failure: &QcFailure) -> Result<()> {
        self.write_code(&failure.key, &failure.marker())
    }
}

/// Entry store kept in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntryStore {
    order: Vec<String>,
    entries: HashMap<String, DatabaseEntry>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: DatabaseEntry) {
        if !self.entries.contains_key(&entry.key) {
            self.order.push(entry.key.clone());
        }
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Builds entries from a profile matrix, attaching metadata by key.
    ///
    /// Metadata rows without a profile become entries without calls.
    pub fn from_matrix(matrix: &AllelicMatrix, metadata: &BTreeMap<String, EntryMetadata>) -> Self {
        let mut store = Self::new();
        for sample in &matrix.samples {
            let meta = metadata.get(&sample.sample_id).cloned().unwrap_or_default();
            store.insert(DatabaseEntry {
                key: sample.sample_id.clone(),
                calls: Some(sample.calls.clone()),
                length: meta.length,
                upload_date: meta.upload_date,
                code: meta.code,
                history: meta.history,
            });
        }
        for (key, meta) in metadata {
            if !store.entries.contains_key(key) {
                store.insert(DatabaseEntry {
                    key: key.clone(),
                    calls: None,
                    length: meta.length,
                    upload_date: meta.upload_date,
                    code: meta.code.clone(),
                    history: meta.history.clone(),
                });
            }
        }
        store
    }

    /// Entries ordered by upload date (undated last), then by insertion order.
    pub fn by_upload_date(&self) -> Vec<&DatabaseEntry> {
        let mut entries = self.entries();
        entries.sort_by_key(|e| (e.upload_date.is_none(), e.upload_date));
        entries
    }
}

impl EntryStore for MemoryEntryStore {
    fn entries(&self) -> Vec<&DatabaseEntry> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .collect()
    }

    fn entry(&self, key: &str) -> Option<&DatabaseEntry> {
        self.entries.get(key)
    }

    fn write_code(&mut self, key: &str, code: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| NomenError::NotFound(format!("entry '{}'", key)))?;
        entry.code = Some(code.to_string());
        Ok(())
    }

    fn append_history(&mut self, key: &str, line: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| NomenError::NotFound(format!("entry '{}'", key)))?;
        entry.history.push(line.to_string());
        Ok(())
    }
}
