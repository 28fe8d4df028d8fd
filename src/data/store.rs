// store.rs - Persistent allele-call store keyed by sample

use crate::error::{NomenError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Slots allocated for a fresh store.
pub const INITIAL_CAPACITY: usize = 2000;

/// Fill ratio that triggers growth.
const LOAD_FACTOR: f64 = 0.75;

/// Every n-th run re-checks stored calls against the source.
pub const VALIDATION_INTERVAL: u64 = 20;

const METADATA_FILE: &str = "metadata.json";
const KEYS_FILE: &str = "keys_mapping.json";
const INVALID_FILE: &str = "invalid_indices.json";
const CALLS_FILE: &str = "allele_calls.bin";

/// Files making up a persisted store.
pub const STORE_FILES: [&str; 4] = [CALLS_FILE, INVALID_FILE, KEYS_FILE, METADATA_FILE];

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Live profiles
    pub size: usize,
    /// Allocated slots
    pub capacity: usize,
    /// Completed runs, starting at 1
    pub runs: u64,
    /// High-water mark: slots `0..last` have been used
    pub last: usize,
    /// Loci per profile
    pub loci: usize,
}

impl StoreMetadata {
    /// Reads `metadata.json` from `dir`, if present.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| NomenError::storage(&path, e))?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

/// Dense array of fixed-length allele-call vectors.
///
/// Deleted slots are tombstoned and reused, lowest first, before the
/// high-water mark advances.
#[derive(Debug)]
pub struct ProfileStore {
    dir: PathBuf,
    metadata: StoreMetadata,
    keys: BTreeMap<String, usize>,
    invalid: BTreeSet<usize>,
    data: Vec<i32>,
}

impl ProfileStore {
    /// Opens the store persisted in `dir`, or starts an empty one.
    ///
    /// Metadata, key mapping and call array must be present together.
    pub fn open(dir: &Path, loci: usize) -> Result<Self> {
        let metadata = StoreMetadata::read(dir)?;
        let keys_path = dir.join(KEYS_FILE);
        let calls_path = dir.join(CALLS_FILE);

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => {
                if keys_path.exists() || calls_path.exists() {
                    return Err(NomenError::Integrity(format!(
                        "profile store in {} has data files but no metadata",
                        dir.display()
                    )));
                }
                info!("🆕 Creating profile store in {}", dir.display());
                return Ok(Self::fresh(dir, loci, INITIAL_CAPACITY));
            }
        };

        if metadata.loci == 0 && metadata.last == 0 {
            // Saved before any profile was called
            info!("🆕 Empty profile store in {} takes {} loci per profile", dir.display(), loci);
            let mut store = Self::fresh(dir, loci, metadata.capacity.max(INITIAL_CAPACITY));
            store.metadata.runs = metadata.runs;
            return Ok(store);
        }
        if metadata.loci != loci {
            return Err(NomenError::Config(format!(
                "profile store holds {} loci per profile, input has {}",
                metadata.loci, loci
            )));
        }
        if !keys_path.exists() {
            return Err(NomenError::Integrity("missing key mapping for store metadata".to_string()));
        }
        if !calls_path.exists() {
            return Err(NomenError::Integrity("found store metadata but no call array".to_string()));
        }

        let text = fs::read_to_string(&keys_path).map_err(|e| NomenError::storage(&keys_path, e))?;
        let keys: BTreeMap<String, usize> = serde_json::from_str(&text)?;
        if keys.len() != metadata.size {
            return Err(NomenError::Integrity(format!(
                "key mapping lists {} profiles, metadata says {}",
                keys.len(),
                metadata.size
            )));
        }

        let invalid_path = dir.join(INVALID_FILE);
        let invalid: BTreeSet<usize> = if invalid_path.exists() {
            let text =
                fs::read_to_string(&invalid_path).map_err(|e| NomenError::storage(&invalid_path, e))?;
            serde_json::from_str(&text)?
        } else {
            BTreeSet::new()
        };

        let compressed = fs::read(&calls_path).map_err(|e| NomenError::storage(&calls_path, e))?;
        let stored: Vec<i32> = bincode::deserialize(&lz4_flex::decompress_size_prepended(&compressed)?)?;
        if stored.len() != metadata.last * loci {
            return Err(NomenError::Integrity(format!(
                "call array holds {} values, expected {} slots of {} loci",
                stored.len(),
                metadata.last,
                loci
            )));
        }
        if let Some((key, &slot)) = keys.iter().find(|(_, &slot)| slot >= metadata.last) {
            return Err(NomenError::Integrity(format!(
                "'{}' maps to slot {} beyond the high-water mark {}",
                key, slot, metadata.last
            )));
        }

        let mut metadata = metadata;
        if metadata.capacity == 0 || metadata.size as f64 / metadata.capacity as f64 > LOAD_FACTOR {
            let resized = (metadata.size as f64 * 1.25) as usize + 1;
            metadata.capacity = resized.max(metadata.capacity).max(metadata.last);
            info!("📐 Resized profile store capacity to {}", metadata.capacity);
        }
        let mut data = stored;
        data.resize(metadata.capacity * loci, -1);

        info!(
            "📂 Loaded profile store from {} ({} profiles, capacity {}, run {})",
            dir.display(),
            metadata.size,
            metadata.capacity,
            metadata.runs
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            metadata,
            keys,
            invalid,
            data,
        })
    }

    pub(crate) fn fresh(dir: &Path, loci: usize, capacity: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            metadata: StoreMetadata {
                size: 0,
                capacity,
                runs: 1,
                last: 0,
                loci,
            },
            keys: BTreeMap::new(),
            invalid: BTreeSet::new(),
            data: vec![-1; capacity * loci],
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.metadata.size
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.metadata.capacity
    }

    pub fn runs(&self) -> u64 {
        self.metadata.runs
    }

    pub fn loci(&self) -> usize {
        self.metadata.loci
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i32])> {
        self.keys
            .iter()
            .map(move |(key, &slot)| (key.as_str(), self.slot_calls(slot)))
    }

    pub(crate) fn slot_of(&self, key: &str) -> Option<usize> {
        self.keys.get(key).copied()
    }

    fn slot_calls(&self, slot: usize) -> &[i32] {
        let loci = self.metadata.loci;
        &self.data[slot * loci..(slot + 1) * loci]
    }

    /// Stores `calls` under `key`; returns false if the key is already present.
    pub fn set(&mut self, key: &str, calls: &[i32]) -> Result<bool> {
        if self.keys.contains_key(key) {
            return Ok(false);
        }
        if self.metadata.loci == 0 && self.metadata.last == 0 {
            self.metadata.loci = calls.len();
            self.data = vec![-1; self.metadata.capacity * calls.len()];
        }
        let loci = self.metadata.loci;
        if calls.len() != loci {
            return Err(NomenError::ProfileLength {
                expected: loci,
                actual: calls.len(),
            });
        }

        let slot = match self.invalid.pop_first() {
            Some(slot) => slot,
            None => {
                if (self.metadata.last + 1) as f64 > self.metadata.capacity as f64 * LOAD_FACTOR {
                    self.grow();
                }
                self.metadata.last += 1;
                self.metadata.last - 1
            }
        };

        self.data[slot * loci..(slot + 1) * loci].copy_from_slice(calls);
        self.keys.insert(key.to_string(), slot);
        self.metadata.size += 1;
        Ok(true)
    }

    fn grow(&mut self) {
        let capacity = (self.metadata.last * 2).max(INITIAL_CAPACITY).max(self.metadata.capacity + 1);
        info!(
            "📐 Growing profile store from {} to {} slots",
            self.metadata.capacity, capacity
        );
        self.data.resize(capacity * self.metadata.loci, -1);
        self.metadata.capacity = capacity;
    }

    pub fn get(&self, key: &str) -> Result<&[i32]> {
        self.keys
            .get(key)
            .map(|&slot| self.slot_calls(slot))
            .ok_or_else(|| NomenError::NotFound(format!("no allele calls stored for '{}'", key)))
    }

    /// Tombstones the slot of `key`; returns false for unknown keys.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.keys.remove(key) {
            Some(slot) => {
                let loci = self.metadata.loci;
                self.data[slot * loci..(slot + 1) * loci].fill(-1);
                self.invalid.insert(slot);
                self.metadata.size -= 1;
                true
            }
            None => {
                warn!("⚠️  Key '{}' is not in the profile store", key);
                false
            }
        }
    }

    pub fn needs_validation(&self) -> bool {
        self.metadata.runs % VALIDATION_INTERVAL == 0
    }

    /// Compares stored calls with the authoritative source.
    ///
    /// Keys absent from the store are ignored; any disagreement is fatal.
    pub fn validate_against<'a, I>(&self, source: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a [i32])>,
    {
        let mismatched: Vec<&str> = source
            .into_iter()
            .filter(|(key, calls)| match self.get(key) {
                Ok(stored) => stored != *calls,
                Err(_) => false,
            })
            .map(|(key, _)| key)
            .collect();

        if mismatched.is_empty() {
            info!("✅ Stored allele calls agree with the source");
            Ok(())
        } else {
            Err(NomenError::Integrity(format!(
                "stored allele calls disagree with the source for: {}",
                mismatched.join("|")
            )))
        }
    }

    /// Writes all store files and counts the run.
    pub fn save(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| NomenError::storage(&self.dir, e))?;

        let used = &self.data[..self.metadata.last * self.metadata.loci];
        let compressed = lz4_flex::compress_prepend_size(&bincode::serialize(used)?);
        write_file(&self.dir.join(CALLS_FILE), &compressed)?;
        write_file(&self.dir.join(KEYS_FILE), &serde_json::to_vec(&self.keys)?)?;
        write_file(&self.dir.join(INVALID_FILE), &serde_json::to_vec(&self.invalid)?)?;

        let mut metadata = self.metadata.clone();
        metadata.runs += 1;
        write_file(&self.dir.join(METADATA_FILE), &serde_json::to_vec_pretty(&metadata)?)?;
        self.metadata = metadata;

        info!(
            "💾 Profile store saved ({} profiles, {} KB)",
            self.metadata.size,
            compressed.len() / 1024
        );
        Ok(())
    }

    /// Copies the persisted files of `dir` into `backup_dir`.
    ///
    /// Returns false when there is nothing to back up. Fails when only
    /// some of the store files exist.
    pub fn backup(dir: &Path, backup_dir: &Path) -> Result<bool> {
        let missing: Vec<&str> = STORE_FILES
            .iter()
            .copied()
            .filter(|file| !dir.join(file).is_file())
            .collect();
        if missing.len() == STORE_FILES.len() {
            return Ok(false);
        }
        if !missing.is_empty() {
            return Err(NomenError::Integrity(format!(
                "missing profile store files: {}",
                missing.join("|")
            )));
        }

        fs::create_dir_all(backup_dir).map_err(|e| NomenError::storage(backup_dir, e))?;
        for file in STORE_FILES {
            let target = backup_dir.join(file);
            fs::copy(dir.join(file), &target).map_err(|e| NomenError::storage(&target, e))?;
        }
        info!("🗄️  Backed up profile store to {}", backup_dir.display());
        Ok(true)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| NomenError::storage(path, e))
}
