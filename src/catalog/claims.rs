use std::path::Path;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{header_index, npi, LoadStats};
use crate::error::{EngineError, Result};
use crate::primitives::sort::MemSize;

/// One row of the monthly billing fact table. The same provider/month/code
/// combination may repeat; consumers aggregate rather than assuming one row
/// per provider-month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub billing_npi: String,
    pub servicing_npi: String,
    pub hcpcs_code: String,
    /// First day of the claim month.
    pub claim_month: NaiveDate,
    pub unique_beneficiaries: u64,
    pub claim_count: u64,
    pub total_paid: f64,
}

impl MemSize for ClaimRecord {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.billing_npi.capacity()
            + self.servicing_npi.capacity()
            + self.hcpcs_code.capacity()
    }
}

/// Parses a claim month from `YYYY-MM` or `YYYY-MM-DD`, pinned to the first
/// of the month.
pub fn parse_claim_month(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.with_day(1);
    }
    NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d").ok()
}

const BILLING_NPI: &str = "BILLING_PROVIDER_NPI_NUM";
const SERVICING_NPI: &str = "SERVICING_PROVIDER_NPI_NUM";
const HCPCS_CODE: &str = "HCPCS_CODE";
const CLAIM_FROM_MONTH: &str = "CLAIM_FROM_MONTH";
const TOTAL_UNIQUE_BENEFICIARIES: &str = "TOTAL_UNIQUE_BENEFICIARIES";
const TOTAL_CLAIMS: &str = "TOTAL_CLAIMS";
const TOTAL_PAID: &str = "TOTAL_PAID";

/// Loads the billing fact table. Malformed rows are skipped and counted;
/// a missing file or missing required column is fatal.
pub fn load_claims(path: &Path) -> Result<(Vec<ClaimRecord>, LoadStats)> {
    if !path.exists() {
        return Err(EngineError::MissingInput(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("spending")
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let billing_idx = header_index(&headers, &file_name, BILLING_NPI)?;
    let servicing_idx = header_index(&headers, &file_name, SERVICING_NPI)?;
    let hcpcs_idx = header_index(&headers, &file_name, HCPCS_CODE)?;
    let month_idx = header_index(&headers, &file_name, CLAIM_FROM_MONTH)?;
    let benes_idx = header_index(&headers, &file_name, TOTAL_UNIQUE_BENEFICIARIES)?;
    let claims_idx = header_index(&headers, &file_name, TOTAL_CLAIMS)?;
    let paid_idx = header_index(&headers, &file_name, TOTAL_PAID)?;

    let mut records = Vec::new();
    let mut stats = LoadStats::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!("skipping unreadable spending row: {err}");
                stats.rows_skipped += 1;
                continue;
            }
        };
        let parsed = parse_claim_row(
            &row,
            billing_idx,
            servicing_idx,
            hcpcs_idx,
            month_idx,
            benes_idx,
            claims_idx,
            paid_idx,
        );
        match parsed {
            Some(record) => {
                records.push(record);
                stats.rows_loaded += 1;
            }
            None => stats.rows_skipped += 1,
        }
    }
    Ok((records, stats))
}

#[allow(clippy::too_many_arguments)]
fn parse_claim_row(
    row: &csv::StringRecord,
    billing_idx: usize,
    servicing_idx: usize,
    hcpcs_idx: usize,
    month_idx: usize,
    benes_idx: usize,
    claims_idx: usize,
    paid_idx: usize,
) -> Option<ClaimRecord> {
    let claim_month = parse_claim_month(row.get(month_idx)?)?;
    let unique_beneficiaries = row.get(benes_idx)?.trim().parse::<u64>().ok()?;
    let claim_count = row.get(claims_idx)?.trim().parse::<u64>().ok()?;
    let total_paid = row.get(paid_idx)?.trim().parse::<f64>().ok()?;
    if !total_paid.is_finite() {
        return None;
    }
    Some(ClaimRecord {
        billing_npi: npi::normalize(row.get(billing_idx)?),
        servicing_npi: npi::normalize(row.get(servicing_idx)?),
        hcpcs_code: row.get(hcpcs_idx)?.trim().to_ascii_uppercase(),
        claim_month,
        unique_beneficiaries,
        claim_count,
        total_paid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn claim_month_accepts_both_encodings() {
        let first = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(parse_claim_month("2024-06"), Some(first));
        assert_eq!(parse_claim_month("2024-06-15"), Some(first));
        assert_eq!(parse_claim_month("June 2024"), None);
    }

    #[test]
    fn loader_skips_malformed_rows_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spending.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "BILLING_PROVIDER_NPI_NUM,SERVICING_PROVIDER_NPI_NUM,HCPCS_CODE,CLAIM_FROM_MONTH,TOTAL_UNIQUE_BENEFICIARIES,TOTAL_CLAIMS,TOTAL_PAID"
        )
        .unwrap();
        writeln!(file, "1234567890,1234567890,G0151,2024-06-01,10,50,5000.0").unwrap();
        writeln!(file, "1234567890,1234567890,G0151,not-a-date,10,50,5000.0").unwrap();
        writeln!(file, "1234567890,1234567890,G0151,2024-07-01,ten,50,5000.0").unwrap();
        drop(file);

        let (records, stats) = load_claims(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(stats.rows_loaded, 1);
        assert_eq!(stats.rows_skipped, 2);
        assert_eq!(records[0].hcpcs_code, "G0151");
    }

    #[test]
    fn loader_fails_on_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spending.csv");
        std::fs::write(&path, "BILLING_PROVIDER_NPI_NUM,HCPCS_CODE\n1,2\n").unwrap();
        let err = load_claims(&path).unwrap_err();
        assert!(matches!(err, EngineError::MissingColumn { .. }));
    }
}
