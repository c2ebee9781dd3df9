use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{header_index, npi, LoadStats};
use crate::error::{EngineError, Result};

/// One exclusion episode from the registry. An NPI may carry several
/// historical episodes; a null reinstatement date means still excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub npi: String,
    pub exclusion_type: String,
    pub exclusion_date: Option<NaiveDate>,
    pub reinstatement_date: Option<NaiveDate>,
}

/// Parses the registry's 8-digit `YYYYMMDD` date encoding. Blank or
/// malformed values are treated as absent.
pub fn parse_compact_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d").ok()
}

const NPI_COL: &str = "NPI";
const EXCLTYPE: &str = "EXCLTYPE";
const EXCLDATE: &str = "EXCLDATE";
const REINDATE: &str = "REINDATE";

/// Loads the exclusion registry into an index keyed by normalized NPI.
/// Rows without a usable NPI are skipped (most registry rows identify
/// individuals by name only and cannot be matched to billing data).
pub fn load_exclusions(
    path: &Path,
) -> Result<(HashMap<String, Vec<ExclusionRecord>>, LoadStats)> {
    if !path.exists() {
        return Err(EngineError::MissingInput(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("exclusions")
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let npi_idx = header_index(&headers, &file_name, NPI_COL)?;
    let type_idx = header_index(&headers, &file_name, EXCLTYPE)?;
    let excl_idx = header_index(&headers, &file_name, EXCLDATE)?;
    let rein_idx = header_index(&headers, &file_name, REINDATE)?;

    let mut index: HashMap<String, Vec<ExclusionRecord>> = HashMap::new();
    let mut stats = LoadStats::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!("skipping unreadable exclusion row: {err}");
                stats.rows_skipped += 1;
                continue;
            }
        };
        let raw_npi = row.get(npi_idx).unwrap_or("");
        let normalized = npi::normalize(raw_npi);
        if normalized.is_empty() {
            stats.rows_skipped += 1;
            continue;
        }
        let record = ExclusionRecord {
            npi: normalized.clone(),
            exclusion_type: row.get(type_idx).unwrap_or("").trim().to_string(),
            exclusion_date: row.get(excl_idx).and_then(parse_compact_date),
            reinstatement_date: row.get(rein_idx).and_then(parse_compact_date),
        };
        index.entry(normalized).or_default().push(record);
        stats.rows_loaded += 1;
    }
    Ok((index, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_date_parses_eight_digit_encoding() {
        assert_eq!(
            parse_compact_date("20230115"),
            NaiveDate::from_ymd_opt(2023, 1, 15)
        );
        assert_eq!(parse_compact_date(""), None);
        assert_eq!(parse_compact_date("2023-01-15"), None);
        assert_eq!(parse_compact_date("20231345"), None);
    }

    #[test]
    fn loader_indexes_by_npi_and_skips_blank_npis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("UPDATED.csv");
        std::fs::write(
            &path,
            "LASTNAME,FIRSTNAME,NPI,EXCLTYPE,EXCLDATE,REINDATE\n\
             DOE,JOHN,1234567890,1128A1,20230101,\n\
             ROE,JANE,,1128B4,20200601,20220101\n\
             DOE,JOHN,1234567890,1128A1,20100101,20120101\n",
        )
        .unwrap();

        let (index, stats) = load_exclusions(&path).unwrap();
        assert_eq!(stats.rows_loaded, 2);
        assert_eq!(stats.rows_skipped, 1);
        let episodes = index.get("1234567890").unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].reinstatement_date, None);
        assert_eq!(
            episodes[1].reinstatement_date,
            NaiveDate::from_ymd_opt(2012, 1, 1)
        );
    }
}
