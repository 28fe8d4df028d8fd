// calculator.rs - One incremental naming run over an entry store

use crate::core::distance::distances_to;
use crate::core::history::RenameEvent;
use crate::core::name::Name;
use crate::core::naming::{Namer, Thresholds};
use crate::core::policy::MergePolicyFactory;
use crate::core::tree::{PublishedCode, Tree};
use crate::data::entry::{DatabaseEntry, EntryStore};
use crate::data::qc::{QcFailure, QcSettings, QC_MARKER_PREFIX};
use crate::data::store::{ProfileStore, StoreMetadata};
use crate::error::{NomenError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const LOCK_FILE: &str = "nomenclature.lock";
const TREE_DIR: &str = "tree";
const TREE_FILE: &str = "current.json";
const PROFILES_DIR: &str = "profiles";
const BACKUP_DIR: &str = "backups";
const LOG_DIR: &str = "logs";

/// Files and directories of a calculator state directory.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn tree_dir(&self) -> PathBuf {
        self.root.join(TREE_DIR)
    }

    pub fn tree_file(&self) -> PathBuf {
        self.tree_dir().join(TREE_FILE)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }
}

/// Exclusive claim on a state directory, held for the length of a run.
///
/// Only a successful run removes the lock file; after a failure the
/// directory stays locked until an operator inspects it.
#[derive(Debug)]
struct StateLock {
    path: PathBuf,
}

impl StateLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(NomenError::Lock(path)),
            Err(e) => return Err(NomenError::storage(&path, e)),
        };
        writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )
        .map_err(|e| NomenError::storage(&path, e))?;
        Ok(Self { path })
    }

    fn release(self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| NomenError::storage(&self.path, e))
    }
}

#[derive(Debug, Clone)]
pub struct CalculatorConfig {
    pub thresholds: Thresholds,
    pub qc: QcSettings,
    /// Prepended to published codes as `"<prefix> - <name>"`
    pub prefix: String,
    pub policy_type: String,
    /// `key=value` pairs for the merge policy
    pub policy_config: String,
    pub state_dir: PathBuf,
}

/// A published code that differs from the one the record system held.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChange {
    pub key: String,
    pub old: Option<String>,
    pub new: String,
    pub date: String,
}

impl CodeChange {
    /// History line, e.g. `LMO1 - 1.1 -> LMO1 - 1.2: 03-14-24`.
    pub fn history_line(&self) -> String {
        format!(
            "{} -> {}: {}",
            self.old.as_deref().unwrap_or("None"),
            self.new,
            self.date
        )
    }
}

/// A published code withdrawn because its sample no longer passes QC.
///
/// The record keeps its code; only a history line is added.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub key: String,
    pub code: String,
    pub failure: QcFailure,
    pub date: String,
}

impl Withdrawal {
    /// History line, e.g. `LMO1 - 1.1 -> withdrawn, FAILED QC: CORE: 03-14-24`.
    pub fn history_line(&self) -> String {
        format!("{} -> withdrawn, {}: {}", self.code, self.failure.marker(), self.date)
    }
}

/// Everything a run decided, for the writers and the summary.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub codes: Vec<PublishedCode>,
    pub changes: Vec<CodeChange>,
    pub failures: Vec<QcFailure>,
    /// Names computed for QC-failed samples, never stored
    pub provisional: Vec<(String, Name)>,
    pub renames: Vec<RenameEvent>,
    /// Named samples whose name was withdrawn during repair
    pub removed: Vec<QcFailure>,
    /// History-only records for removed samples holding a published code
    pub withdrawals: Vec<Withdrawal>,
    pub repaired: usize,
    pub newly_named: usize,
    pub merges: usize,
    /// Published codes carrying every level
    pub names_given: usize,
}

/// Drives one naming run against a state directory.
pub struct Calculator {
    config: CalculatorConfig,
    namer: Namer,
    layout: StateLayout,
}

impl Calculator {
    pub fn new(config: CalculatorConfig) -> Result<Self> {
        let policy = MergePolicyFactory::create(&config.policy_type, &config.policy_config)
            .map_err(NomenError::Config)?;
        let namer = Namer::new(config.thresholds.clone(), policy);
        let layout = StateLayout::new(&config.state_dir);
        Ok(Self {
            config,
            namer,
            layout,
        })
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    /// Names every eligible entry and writes changed codes back to `store`.
    ///
    /// Nothing is persisted unless the whole run succeeds.
    pub fn run<S: EntryStore>(&self, store: &mut S) -> Result<RunReport> {
        let start = Instant::now();
        fs::create_dir_all(self.layout.root())
            .map_err(|e| NomenError::storage(self.layout.root(), e))?;
        let lock = StateLock::acquire(self.layout.lock_file())?;
        info!("🔒 Acquired lock on {}", self.layout.root().display());

        let run_date = chrono::Local::now().format("%m-%d-%y").to_string();
        let depth = self.config.thresholds.depth();

        let (mut tree, mut profiles) = self.load_state(store)?;
        let history_mark = tree.history().len();
        let mut report = RunReport::default();

        {
            let entries = store.entries();
            self.repair_named(&entries, &mut tree, &mut profiles, &mut report)?;
            self.name_new(&entries, &mut tree, &mut profiles, &mut report)?;
        }

        report.renames = tree.history().since(history_mark).to_vec();
        report.codes = tree.published_codes(&self.config.prefix);
        let markers = self.plan_publication(store, &tree, &run_date, &mut report);

        self.persist(&tree, &mut profiles)?;
        self.publish(store, &report, &markers)?;
        lock.release()?;

        info!(
            "✅ Run complete in {:.2}s: {} new names, {} code changes, {} QC failures, {} merges",
            start.elapsed().as_secs_f64(),
            report.newly_named,
            report.changes.len(),
            report.failures.len(),
            report.merges
        );
        info!("📊 Complete codes issued: {} (tree depth {})", report.names_given, depth);
        Ok(report)
    }

    fn load_state<S: EntryStore>(&self, store: &S) -> Result<(Tree, ProfileStore)> {
        let depth = self.config.thresholds.depth();
        let tree_file = self.layout.tree_file();
        let tree = if tree_file.exists() {
            Tree::load(&tree_file, depth)?
        } else {
            info!("🌱 No saved tree, starting fresh with depth {}", depth);
            Tree::new(depth)
        };

        let profiles_dir = self.layout.profiles_dir();
        let entries = store.entries();
        let loci = match entries.iter().find_map(|e| e.calls.as_ref()) {
            Some(calls) => calls.len(),
            None => StoreMetadata::read(&profiles_dir)?.map_or(0, |m| m.loci),
        };
        let profiles = ProfileStore::open(&profiles_dir, loci)?;

        info!("🔍 Checking data integrity...");
        if profiles.len() < tree.len() {
            return Err(NomenError::Integrity(format!(
                "profile store holds {} profiles but {} samples are named",
                profiles.len(),
                tree.len()
            )));
        }
        if profiles.needs_validation() {
            info!("🔍 Run {}: validating stored allele calls", profiles.runs());
            profiles.validate_against(
                entries
                    .iter()
                    .filter_map(|e| e.calls.as_deref().map(|calls| (e.key.as_str(), calls))),
            )?;
        }
        Ok((tree, profiles))
    }

    /// Named samples whose calls are missing from the store get them back,
    /// or lose their name when they no longer pass QC.
    fn repair_named(
        &self,
        entries: &[&DatabaseEntry],
        tree: &mut Tree,
        profiles: &mut ProfileStore,
        report: &mut RunReport,
    ) -> Result<()> {
        for entry in entries {
            let Some(calls) = entry.calls.as_deref() else {
                continue;
            };
            if !tree.has_resolved_name(&entry.key) || profiles.contains(&entry.key) {
                continue;
            }

            let reasons = self.config.qc.check(calls, entry.length);
            if reasons.is_empty() {
                profiles.set(&entry.key, calls)?;
                report.repaired += 1;
                debug!("Restored allele calls of named sample {}", entry.key);
            } else {
                let failure = QcFailure {
                    key: entry.key.clone(),
                    reasons,
                };
                warn!(
                    "⚠️  {} has a code but now fails QC ({}); removing its name",
                    entry.key,
                    failure.marker()
                );
                tree.remove_name(&entry.key);
                report.removed.push(failure);
            }
        }
        Ok(())
    }

    fn name_new(
        &self,
        entries: &[&DatabaseEntry],
        tree: &mut Tree,
        profiles: &mut ProfileStore,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut named: Vec<String> = tree
            .names()
            .keys()
            .filter(|key| profiles.contains(key))
            .cloned()
            .collect();
        if named.len() < tree.len() {
            warn!(
                "⚠️  {} named samples have no stored allele calls and are left out of distance checks",
                tree.len() - named.len()
            );
        }

        let withdrawn: HashSet<&str> = report.removed.iter().map(|f| f.key.as_str()).collect();
        let pending: Vec<&DatabaseEntry> = entries
            .iter()
            .copied()
            .filter(|e| {
                e.calls.is_some()
                    && !tree.has_resolved_name(&e.key)
                    && !withdrawn.contains(e.key.as_str())
            })
            .collect();
        info!("🧮 Naming {} new samples against {} named", pending.len(), named.len());

        let pb = ProgressBar::new(pending.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA: {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for entry in pending {
            pb.inc(1);
            let Some(calls) = entry.calls.as_deref() else {
                continue;
            };
            if calls.len() != profiles.loci() {
                pb.finish_and_clear();
                return Err(NomenError::ProfileLength {
                    expected: profiles.loci(),
                    actual: calls.len(),
                });
            }

            let reasons = self.config.qc.check(calls, entry.length);
            let qc_passed = reasons.is_empty();
            if qc_passed {
                profiles.set(&entry.key, calls)?;
            }

            let distances = {
                let pool = named
                    .iter()
                    .map(|key| profiles.get(key))
                    .collect::<Result<Vec<&[i32]>>>()?;
                distances_to(calls, &pool)
            };
            let assignment = self
                .namer
                .assign(tree, &named, &entry.key, &distances, qc_passed)?;
            report.merges += assignment.merges;

            if assignment.resolved {
                named.push(entry.key.clone());
                report.newly_named += 1;
            } else {
                report.provisional.push((entry.key.clone(), assignment.name));
                report.failures.push(QcFailure {
                    key: entry.key.clone(),
                    reasons,
                });
            }
        }
        pb.finish_and_clear();
        Ok(())
    }

    /// Decides code changes, history lines and QC markers without touching `store`.
    ///
    /// Returns the failures whose records get the QC marker.
    fn plan_publication<S: EntryStore>(
        &self,
        store: &S,
        tree: &Tree,
        run_date: &str,
        report: &mut RunReport,
    ) -> Vec<QcFailure> {
        for code in &report.codes {
            if code.complete {
                report.names_given += 1;
            }
            let current = match store.entry(&code.key) {
                Some(entry) => entry.code.clone(),
                None => continue,
            };
            if current.as_deref() == Some(code.code.as_str()) {
                continue;
            }
            report.changes.push(CodeChange {
                key: code.key.clone(),
                old: current,
                new: code.code.clone(),
                date: run_date.to_string(),
            });
        }

        for failure in &report.removed {
            let Some(code) = store.entry(&failure.key).and_then(|e| e.code.clone()) else {
                continue;
            };
            if is_published(&code) {
                report.withdrawals.push(Withdrawal {
                    key: failure.key.clone(),
                    code,
                    failure: failure.clone(),
                    date: run_date.to_string(),
                });
            }
        }

        // A QC marker never replaces a published code
        report
            .failures
            .iter()
            .filter(|f| !tree.has_resolved_name(&f.key))
            .filter(|f| {
                store
                    .entry(&f.key)
                    .and_then(|e| e.code.as_deref())
                    .map_or(true, |code| !is_published(code))
            })
            .cloned()
            .collect()
    }

    fn publish<S: EntryStore>(
        &self,
        store: &mut S,
        report: &RunReport,
        markers: &[QcFailure],
    ) -> Result<()> {
        for change in &report.changes {
            store.write_code(&change.key, &change.new)?;
            store.append_history(&change.key, &change.history_line())?;
        }
        for withdrawal in &report.withdrawals {
            warn!("⚠️  Code {} of {} is withdrawn", withdrawal.code, withdrawal.key);
            store.append_history(&withdrawal.key, &withdrawal.history_line())?;
        }
        for failure in markers {
            store.mark_failed_qc(failure)?;
        }
        Ok(())
    }

    fn persist(&self, tree: &Tree, profiles: &mut ProfileStore) -> Result<()> {
        let stamp = chrono::Local::now().format("%m-%d-%y@%H-%M-%S").to_string();

        let tree_file = self.layout.tree_file();
        if tree_file.exists() {
            let backup = self.layout.tree_dir().join(format!("tree_{}.json", stamp));
            fs::copy(&tree_file, &backup).map_err(|e| NomenError::storage(&backup, e))?;
            debug!("Previous tree kept as {}", backup.display());
        }

        let profile_backup = self.layout.backup_dir().join(format!("profiles_{}", stamp));
        ProfileStore::backup(&self.layout.profiles_dir(), &profile_backup)?;

        tree.save(&tree_file)?;
        profiles.save()?;
        info!("💾 Saved tree ({} names) to {}", tree.len(), tree_file.display());
        Ok(())
    }
}

/// Whether `code` is a nomenclature code rather than a QC marker.
fn is_published(code: &str) -> bool {
    !code.is_empty() && !code.starts_with(QC_MARKER_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::entry::MemoryEntryStore;
    use crate::data::qc::QcReason;

    fn config(dir: &Path) -> CalculatorConfig {
        CalculatorConfig {
            thresholds: Thresholds::new(vec![50.0, 10.0]).unwrap(),
            qc: QcSettings {
                min_presence: 0.8,
                length_range: None,
            },
            prefix: "TST".to_string(),
            policy_type: "permissive".to_string(),
            policy_config: String::new(),
            state_dir: dir.to_path_buf(),
        }
    }

    fn entry(key: &str, calls: Vec<i32>) -> DatabaseEntry {
        DatabaseEntry {
            calls: Some(calls),
            ..DatabaseEntry::new(key)
        }
    }

    #[test]
    fn test_code_change_history_line() {
        let change = CodeChange {
            key: "S1".into(),
            old: None,
            new: "TST - 1".into(),
            date: "01-02-24".into(),
        };
        assert_eq!(change.history_line(), "None -> TST - 1: 01-02-24");
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let lock = StateLock::acquire(path.clone()).unwrap();
        assert!(matches!(StateLock::acquire(path.clone()), Err(NomenError::Lock(_))));
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_run_names_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));
        store.insert(entry("B", vec![1; 10]));
        store.insert(entry("Q", vec![0, 0, 0, 1, 1, 1, 1, 1, 1, 1]));
        store.insert(DatabaseEntry::new("uncalled"));

        let report = calculator.run(&mut store).unwrap();
        assert_eq!(report.newly_named, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reasons, vec![QcReason::Core]);
        assert_eq!(report.names_given, 2);
        assert_eq!(store.entry("A").unwrap().code.as_deref(), Some("TST - 1.1"));
        assert_eq!(store.entry("Q").unwrap().code.as_deref(), Some("FAILED QC: CORE"));
        assert!(store.entry("uncalled").unwrap().code.is_none());
        assert!(!calculator.layout().lock_file().exists());
        assert!(calculator.layout().tree_file().exists());
    }

    #[test]
    fn test_unchanged_codes_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));
        calculator.run(&mut store).unwrap();
        assert_eq!(store.entry("A").unwrap().code.as_deref(), Some("TST - 1"));

        let report = calculator.run(&mut store).unwrap();
        assert!(report.changes.is_empty());
        assert_eq!(store.entry("A").unwrap().history.len(), 1);
    }

    #[test]
    fn test_locked_state_refuses_to_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "held").unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));
        assert!(matches!(calculator.run(&mut store), Err(NomenError::Lock(_))));
        assert!(store.entry("A").unwrap().code.is_none());
    }

    #[test]
    fn test_failed_save_leaves_records_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the tree directory belongs makes the save fail
        fs::write(dir.path().join(TREE_DIR), "").unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));

        assert!(calculator.run(&mut store).is_err());
        let a = store.entry("A").unwrap();
        assert!(a.code.is_none());
        assert!(a.history.is_empty());
    }

    #[test]
    fn test_store_started_without_calls_adopts_locus_count() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(DatabaseEntry::new("uncalled"));
        calculator.run(&mut store).unwrap();

        store.insert(entry("A", vec![1; 10]));
        let report = calculator.run(&mut store).unwrap();
        assert_eq!(report.newly_named, 1);
        assert_eq!(store.entry("A").unwrap().code.as_deref(), Some("TST - 1"));
        let profiles = ProfileStore::open(&calculator.layout().profiles_dir(), 10).unwrap();
        assert_eq!(profiles.loci(), 10);
    }

    #[test]
    fn test_withdrawn_name_keeps_published_code() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));
        store.insert(entry("B", vec![1; 10]));
        calculator.run(&mut store).unwrap();
        assert_eq!(store.entry("B").unwrap().code.as_deref(), Some("TST - 1.1"));

        // B loses its stored calls; an unnamed profile keeps the store size
        let profiles_dir = calculator.layout().profiles_dir();
        let mut profiles = ProfileStore::open(&profiles_dir, 10).unwrap();
        assert!(profiles.delete("B"));
        profiles.set("spare", &[2; 10]).unwrap();
        profiles.save().unwrap();

        let mut b = store.entry("B").unwrap().clone();
        b.calls = Some(vec![0, 0, 0, 1, 1, 1, 1, 1, 1, 1]);
        store.insert(b);

        let report = calculator.run(&mut store).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].key, "B");
        assert_eq!(report.newly_named, 0);
        assert!(report.failures.is_empty());
        assert_eq!(report.withdrawals.len(), 1);

        let b = store.entry("B").unwrap();
        assert_eq!(b.code.as_deref(), Some("TST - 1.1"));
        assert_eq!(b.history.len(), 2);
        assert!(b.history[1].starts_with("TST - 1.1 -> withdrawn, FAILED QC: CORE: "));

        // Later runs report the failure but never overwrite the code
        let report = calculator.run(&mut store).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(store.entry("B").unwrap().code.as_deref(), Some("TST - 1.1"));
        assert_eq!(store.entry("B").unwrap().history.len(), 2);
    }

    #[test]
    fn test_short_profile_is_rejected_before_distances() {
        let dir = tempfile::tempdir().unwrap();
        let calculator = Calculator::new(config(dir.path())).unwrap();
        let mut store = MemoryEntryStore::new();
        store.insert(entry("A", vec![1; 10]));
        store.insert(entry("short", vec![0, 0, 1, 1, 1]));

        assert!(matches!(
            calculator.run(&mut store),
            Err(NomenError::ProfileLength {
                expected: 10,
                actual: 5
            })
        ));
        assert!(store.entry("A").unwrap().code.is_none());
    }

    #[test]
    fn test_unknown_policy_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.policy_type = "nope".into();
        assert!(matches!(Calculator::new(cfg), Err(NomenError::Config(_))));
    }
}
