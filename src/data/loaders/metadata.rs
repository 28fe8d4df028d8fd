// metadata.rs - Sample metadata loader (length, upload date, current code)

use crate::data::entry::EntryMetadata;
use chrono::NaiveDate;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct MetadataRow {
    key: String,
    #[serde(default)]
    length: Option<u64>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    code: Option<String>,
    /// Previous history lines separated by ';'
    #[serde(default)]
    history: Option<String>,
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date())
        })
        .or_else(|_| NaiveDate::parse_from_str(text, "%m-%d-%y"))
        .map_err(|_| format!("Invalid upload date '{}'", text))
}

/// Load a tab separated metadata table with a `key` column and any of
/// `length`, `upload_date`, `code`, `history` (columns in any order).
pub fn load_metadata(file_path: &Path) -> Result<BTreeMap<String, EntryMetadata>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(file_path)
        .map_err(|e| format!("Failed to open metadata file '{}': {}", file_path.display(), e))?;

    let mut metadata = BTreeMap::new();
    for (line_num, row) in reader.deserialize::<MetadataRow>().enumerate() {
        let row = row.map_err(|e| format!("Metadata line {}: {}", line_num + 2, e))?;
        let upload_date = match row.upload_date.as_deref() {
            Some(text) if !text.trim().is_empty() => Some(parse_date(text)?),
            _ => None,
        };
        let history = row
            .history
            .map(|h| {
                h.split(';')
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        metadata.insert(
            row.key,
            EntryMetadata {
                length: row.length,
                upload_date,
                code: row.code.filter(|c| !c.is_empty()),
                history,
            },
        );
    }

    info!("📋 Loaded metadata for {} samples from '{}'", metadata.len(), file_path.display());
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_metadata_any_column_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upload_date\tkey\tlength\tcode").unwrap();
        writeln!(file, "2024-02-01\tS1\t2950000\tLMO1.0 - 1.1").unwrap();
        writeln!(file, "\tS2\t\t").unwrap();
        file.flush().unwrap();

        let meta = load_metadata(file.path()).unwrap();
        assert_eq!(meta["S1"].length, Some(2_950_000));
        assert_eq!(meta["S1"].code.as_deref(), Some("LMO1.0 - 1.1"));
        assert_eq!(meta["S1"].upload_date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(meta["S2"].length, None);
        assert!(meta["S2"].upload_date.is_none());
    }

    #[test]
    fn test_invalid_date_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "key\tupload_date").unwrap();
        writeln!(file, "S1\tyesterday").unwrap();
        file.flush().unwrap();
        assert!(load_metadata(file.path()).is_err());
    }
}
