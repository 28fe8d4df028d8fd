// csv.rs - CSV file loader for allelic profiles

use crate::data::profile::{parse_allele, AllelicMatrix, AllelicProfile};
use log::info;
use std::path::Path;

impl AllelicMatrix {
    /// Load a comma separated profile matrix
    pub fn from_csv(file_path: &Path, missing_char: &str) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_path(file_path)
            .map_err(|e| format!("Failed to read CSV file: {}", e))?;

        let headers = reader
            .headers()
            .map_err(|e| format!("Failed to read CSV header: {}", e))?
            .clone();
        if headers.len() < 2 {
            return Err("CSV header must have at least 2 columns".to_string());
        }
        let loci_names: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();

        let mut samples = Vec::new();
        for (line_num, record) in reader.records().enumerate() {
            let record = record.map_err(|e| format!("CSV line {}: {}", line_num + 2, e))?;
            if record.len() != headers.len() {
                return Err(format!(
                    "CSV line {} has {} columns, expected {}",
                    line_num + 2,
                    record.len(),
                    headers.len()
                ));
            }

            let calls = record
                .iter()
                .skip(1)
                .map(|allele| parse_allele(allele, missing_char))
                .collect();
            samples.push(AllelicProfile {
                sample_id: record[0].to_string(),
                calls,
            });
        }

        info!(
            "✅ CSV loaded: {} samples, {} loci",
            samples.len(),
            loci_names.len()
        );
        Ok(AllelicMatrix {
            samples,
            loci_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "sample,L1,L2").unwrap();
        writeln!(file, "S1, 5 ,NA").unwrap();
        file.flush().unwrap();

        let matrix = AllelicMatrix::from_file(file.path(), "-").unwrap();
        assert_eq!(matrix.samples.len(), 1);
        assert_eq!(matrix.samples[0].sample_id, "S1");
        assert_eq!(matrix.samples[0].calls, vec![5, 0]);
    }
}
