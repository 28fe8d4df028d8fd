// mod.rs - Output formatters module

use crate::core::history::RenameEvent;
use crate::core::name::Name;
use crate::core::tree::PublishedCode;
use crate::data::entry::{DatabaseEntry, EntryStore};
use crate::data::qc::QcFailure;
use crate::pipeline::calculator::CodeChange;
use crate::pipeline::simulation::SimulationReport;
use crate::pipeline::sweep::SweepResult;
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Ensure parent directory exists before creating file
fn ensure_parent_dir(file_path: &Path) -> Result<(), String> {
    if let Some(parent) = file_path.parent() {
        create_dir_all(parent).map_err(|e| {
            format!("Failed to create parent directory '{}': {}", parent.display(), e)
        })?;
    }
    Ok(())
}

fn write_err(e: std::io::Error) -> String {
    format!("Write error: {}", e)
}

/// Creates `file_path` and writes the provenance header.
fn create_with_header(file_path: &Path, command_line: &str) -> Result<BufWriter<File>, String> {
    ensure_parent_dir(file_path)?;
    let file = File::create(file_path).map_err(|e| {
        format!("Failed to create output file '{}': {}", file_path.display(), e)
    })?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "# Command: {}", command_line).map_err(write_err)?;
    writeln!(
        writer,
        "# Generated: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
    .map_err(write_err)?;
    writeln!(writer, "# cgnomen v{}", env!("CARGO_PKG_VERSION")).map_err(write_err)?;
    Ok(writer)
}

fn finish(mut writer: BufWriter<File>, file_path: &Path, what: &str) -> Result<(), String> {
    writer.flush().map_err(|e| format!("Flush error: {}", e))?;
    println!("✅ {} written to: {}", what, file_path.display());
    Ok(())
}

/// Published codes: `key, code, complete, name`.
pub fn write_codes_tsv(
    file_path: &Path,
    codes: &[PublishedCode],
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create_with_header(file_path, command_line)?;
    writeln!(writer, "key\tcode\tcomplete\tname").map_err(write_err)?;
    for code in codes {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            code.key, code.code, code.complete, code.name
        )
        .map_err(write_err)?;
    }
    finish(writer, file_path, "Codes")
}

/// Code changes of this run: `key, old, new, date`.
pub fn write_history_tsv(
    file_path: &Path,
    changes: &[CodeChange],
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create_with_header(file_path, command_line)?;
    writeln!(writer, "key\told\tnew\tdate").map_err(write_err)?;
    for change in changes {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            change.key,
            change.old.as_deref().unwrap_or("None"),
            change.new,
            change.date
        )
        .map_err(write_err)?;
    }
    finish(writer, file_path, "Code history")
}

/// QC failures with their provisional names: `key, reasons, provisional_name`.
pub fn write_qc_failures_tsv(
    file_path: &Path,
    failures: &[QcFailure],
    provisional: &[(String, Name)],
    command_line: &str,
) -> Result<(), String> {
    let provisional: HashMap<&str, &Name> =
        provisional.iter().map(|(k, n)| (k.as_str(), n)).collect();
    let mut writer = create_with_header(file_path, command_line)?;
    writeln!(writer, "key\treasons\tprovisional_name").map_err(write_err)?;
    for failure in failures {
        let reasons: Vec<String> = failure.reasons.iter().map(|r| r.to_string()).collect();
        let name = provisional
            .get(failure.key.as_str())
            .map(|n| n.to_string())
            .unwrap_or_default();
        writeln!(writer, "{}\t{}\t{}", failure.key, reasons.join(","), name).map_err(write_err)?;
    }
    finish(writer, file_path, "QC failures")
}

/// Names rewritten by cluster merges: `key, old, new`.
pub fn write_merge_events_tsv(
    file_path: &Path,
    events: &[RenameEvent],
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create_with_header(file_path, command_line)?;
    writeln!(writer, "key\told\tnew").map_err(write_err)?;
    for event in events {
        writeln!(writer, "{}\t{}\t{}", event.key, event.old, event.new).map_err(write_err)?;
    }
    finish(writer, file_path, "Merge events")
}

/// Entries with their updated codes, readable again as a metadata table.
pub fn write_metadata_tsv<S: EntryStore>(
    file_path: &Path,
    store: &S,
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create_with_header(file_path, command_line)?;
    writeln!(writer, "key\tlength\tupload_date\tcode\thistory").map_err(write_err)?;
    for entry in store.entries() {
        write_metadata_row(&mut writer, entry)?;
    }
    finish(writer, file_path, "Updated metadata")
}

fn write_metadata_row<W: Write>(writer: &mut W, entry: &DatabaseEntry) -> Result<(), String> {
    writeln!(
        writer,
        "{}\t{}\t{}\t{}\t{}",
        entry.key,
        entry.length.map(|l| l.to_string()).unwrap_or_default(),
        entry
            .upload_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        entry.code.as_deref().unwrap_or(""),
        entry.history.join(";")
    )
    .map_err(write_err)
}

/// Per-depth change counts of a simulation.
pub fn write_simulation_report(
    file_path: &Path,
    report: &SimulationReport,
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create_with_header(file_path, command_line)?;
    let thresholds: Vec<String> = report.thresholds.iter().map(|t| t.to_string()).collect();
    writeln!(writer, "# Thresholds: {}", thresholds.join(",")).map_err(write_err)?;
    writeln!(
        writer,
        "# Seed size: {}\tAdded: {}\tIterations: {}",
        report.seed_size, report.added, report.iterations
    )
    .map_err(write_err)?;
    writeln!(writer, "levels_kept\ttotal\tseed\tpost").map_err(write_err)?;
    let tracker = &report.tracker;
    for kept in 0..tracker.depth() {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            kept, tracker.total[kept], tracker.seed[kept], tracker.post[kept]
        )
        .map_err(write_err)?;
    }
    writeln!(writer, "# Per iteration").map_err(write_err)?;
    writeln!(writer, "iteration\tchanges_by_levels_kept").map_err(write_err)?;
    for (iteration, counts) in &tracker.per_iteration {
        let counts: Vec<String> = counts.iter().map(|c| c.to_string()).collect();
        writeln!(writer, "{}\t{}", iteration, counts.join(",")).map_err(write_err)?;
    }
    finish(writer, file_path, "Simulation report")
}

/// Appends sweep results as CSV rows, flushing after each.
pub struct SweepCsvWriter {
    writer: csv::Writer<File>,
}

impl SweepCsvWriter {
    pub fn create(file_path: &Path, depth: usize) -> Result<Self, String> {
        ensure_parent_dir(file_path)?;
        let mut writer = csv::Writer::from_path(file_path).map_err(|e| {
            format!("Failed to create output file '{}': {}", file_path.display(), e)
        })?;
        let mut header: Vec<String> = (1..=depth).map(|l| format!("threshold_{}", l)).collect();
        header.push("total_changes".to_string());
        header.extend((0..depth).map(|k| format!("kept_{}", k)));
        writer.write_record(&header).map_err(|e| format!("Write error: {}", e))?;
        writer.flush().map_err(write_err)?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, result: &SweepResult) -> Result<(), String> {
        let mut record: Vec<String> = result.thresholds.iter().map(|t| t.to_string()).collect();
        record.push(result.total_changes.to_string());
        record.extend(result.changes_by_depth.iter().map(|c| c.to_string()));
        self.writer
            .write_record(&record)
            .map_err(|e| format!("Write error: {}", e))?;
        self.writer.flush().map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::entry::MemoryEntryStore;
    use crate::data::loaders::load_metadata;
    use crate::data::qc::QcReason;
    use std::fs;

    #[test]
    fn test_codes_tsv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/codes.tsv");
        let codes = vec![PublishedCode {
            key: "S1".into(),
            code: "X - 1.2".into(),
            name: Name::new(vec![1, 2]),
            level: 2,
            complete: true,
        }];
        write_codes_tsv(&path, &codes, "cgnomen test").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Command: cgnomen test"));
        assert!(text.contains("key\tcode\tcomplete\tname\nS1\tX - 1.2\ttrue\t1.2\n"));
    }

    #[test]
    fn test_qc_failures_include_provisional_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc.tsv");
        let failures = vec![QcFailure {
            key: "Q".into(),
            reasons: vec![QcReason::Core, QcReason::Length],
        }];
        let provisional = vec![("Q".to_string(), Name::new(vec![1, -1]))];
        write_qc_failures_tsv(&path, &failures, &provisional, "cmd").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Q\tCORE,LENGTH\t1.-1"));
    }

    #[test]
    fn test_metadata_output_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.tsv");
        let mut store = MemoryEntryStore::new();
        let mut entry = DatabaseEntry::new("S1");
        entry.length = Some(3_000_000);
        entry.code = Some("X - 1".into());
        entry.history = vec!["None -> X - 1: 01-01-24".into()];
        store.insert(entry);
        store.insert(DatabaseEntry::new("S2"));

        write_metadata_tsv(&path, &store, "cmd").unwrap();
        let metadata = load_metadata(&path).unwrap();
        assert_eq!(metadata["S1"].code.as_deref(), Some("X - 1"));
        assert_eq!(metadata["S1"].history.len(), 1);
        assert_eq!(metadata["S1"].length, Some(3_000_000));
        assert!(metadata["S2"].code.is_none());
    }

    #[test]
    fn test_sweep_writer_flushes_each_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let mut writer = SweepCsvWriter::create(&path, 2).unwrap();
        writer
            .write(&SweepResult {
                thresholds: vec![40.0, 10.0],
                total_changes: 3,
                changes_by_depth: vec![2, 1],
            })
            .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "threshold_1,threshold_2,total_changes,kept_0,kept_1\n40,10,3,2,1\n"
        );
    }
}
