// tsv.rs - TSV file loader for allelic profiles

use crate::data::profile::{parse_allele, AllelicMatrix, AllelicProfile};
use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

impl AllelicMatrix {
    /// Load a chewBBACA-style TSV: first column sample id, one column per locus
    pub fn from_tsv(file_path: &Path, missing_char: &str) -> Result<Self, String> {
        let file = File::open(file_path).map_err(|e| format!("Failed to open TSV file: {}", e))?;

        let reader = BufReader::new(file);
        let mut lines = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map_or(true, |l| !l.starts_with('#') && !l.trim().is_empty()));

        let (_, header_line) = lines.next().ok_or("Empty TSV file")?;
        let header_line = header_line.map_err(|e| format!("Failed to read header: {}", e))?;

        let header_parts: Vec<&str> = header_line.split('\t').collect();
        if header_parts.len() < 2 {
            return Err("Header must have at least sample_id and one locus".to_string());
        }

        let loci_names: Vec<String> = header_parts[1..].iter().map(|s| s.trim().to_string()).collect();
        let mut samples = Vec::new();

        for (line_num, line_result) in lines {
            let line =
                line_result.map_err(|e| format!("Failed to read line {}: {}", line_num + 1, e))?;

            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() != header_parts.len() {
                return Err(format!(
                    "Line {} has {} fields, expected {}",
                    line_num + 1,
                    parts.len(),
                    header_parts.len()
                ));
            }

            let calls = parts[1..]
                .iter()
                .map(|allele| parse_allele(allele, missing_char))
                .collect();

            samples.push(AllelicProfile {
                sample_id: parts[0].trim().to_string(),
                calls,
            });
        }

        info!(
            "✅ TSV loaded: {} samples, {} loci",
            samples.len(),
            loci_names.len()
        );
        Ok(AllelicMatrix {
            samples,
            loci_names,
        })
    }
}
