use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{header_index, npi, LoadStats};
use crate::error::{EngineError, Result};

/// Provider entity classification from the registry's entity type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Individual,
    Organization,
    Unknown,
}

impl EntityType {
    fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => EntityType::Individual,
            "2" => EntityType::Organization,
            _ => EntityType::Unknown,
        }
    }
}

/// One representative provider registry row per NPI. Optional fields are
/// commonly missing and degrade to "UNKNOWN" for grouping purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub npi: String,
    pub entity_type: EntityType,
    pub display_name: String,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub taxonomy_code: Option<String>,
    pub enumeration_date: Option<NaiveDate>,
    pub authorized_official_last: Option<String>,
    pub authorized_official_first: Option<String>,
}

/// The registry carries several hundred columns; the loader reads this fixed
/// subset by header name.
const NPI_COL: &str = "NPI";
const ENTITY_TYPE: &str = "Entity Type Code";
const ORG_NAME: &str = "Provider Organization Name (Legal Business Name)";
const LAST_NAME: &str = "Provider Last Name (Legal Name)";
const FIRST_NAME: &str = "Provider First Name";
const STATE: &str = "Provider Business Practice Location Address State Name";
const ZIP: &str = "Provider Business Practice Location Address Postal Code";
const TAXONOMY: &str = "Healthcare Provider Taxonomy Code_1";
const ENUMERATION_DATE: &str = "Provider Enumeration Date";
const OFFICIAL_LAST: &str = "Authorized Official Last Name";
const OFFICIAL_FIRST: &str = "Authorized Official First Name";

/// Finds the registry file (`npidata_pfile*.csv`) in the data directory.
pub fn find_provider_file(data_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("npidata_pfile") && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates
        .pop()
        .ok_or_else(|| EngineError::MissingInput(data_dir.join("npidata_pfile*.csv")))
}

/// Registry enumeration dates appear as `MM/DD/YYYY` in the published files
/// and ISO in some derived extracts; accept both.
fn parse_enumeration_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

fn optional_field(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Loads the provider registry, deduplicating by NPI (first row wins).
pub fn load_providers(
    path: &Path,
) -> Result<(BTreeMap<String, ProviderRecord>, LoadStats)> {
    if !path.exists() {
        return Err(EngineError::MissingInput(path.to_path_buf()));
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("providers")
        .to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let npi_idx = header_index(&headers, &file_name, NPI_COL)?;
    let entity_idx = header_index(&headers, &file_name, ENTITY_TYPE)?;
    let org_idx = header_index(&headers, &file_name, ORG_NAME)?;
    let last_idx = header_index(&headers, &file_name, LAST_NAME)?;
    let first_idx = header_index(&headers, &file_name, FIRST_NAME)?;
    let state_idx = header_index(&headers, &file_name, STATE)?;
    let zip_idx = header_index(&headers, &file_name, ZIP)?;
    let taxonomy_idx = header_index(&headers, &file_name, TAXONOMY)?;
    let enum_idx = header_index(&headers, &file_name, ENUMERATION_DATE)?;
    let official_last_idx = header_index(&headers, &file_name, OFFICIAL_LAST)?;
    let official_first_idx = header_index(&headers, &file_name, OFFICIAL_FIRST)?;

    let mut providers = BTreeMap::new();
    let mut stats = LoadStats::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                debug!("skipping unreadable provider row: {err}");
                stats.rows_skipped += 1;
                continue;
            }
        };
        let normalized = npi::normalize(row.get(npi_idx).unwrap_or(""));
        if normalized.is_empty() {
            stats.rows_skipped += 1;
            continue;
        }

        let org_name = optional_field(row.get(org_idx));
        let last_name = optional_field(row.get(last_idx));
        let first_name = optional_field(row.get(first_idx));
        let display_name = match (org_name, last_name, first_name) {
            (Some(org), _, _) => org,
            (None, Some(last), Some(first)) => format!("{last}, {first}"),
            (None, Some(last), None) => last,
            (None, None, Some(first)) => first,
            (None, None, None) => "Unknown".to_string(),
        };

        let record = ProviderRecord {
            npi: normalized.clone(),
            entity_type: EntityType::from_code(row.get(entity_idx).unwrap_or("")),
            display_name,
            state: optional_field(row.get(state_idx)),
            zip_code: optional_field(row.get(zip_idx)),
            taxonomy_code: optional_field(row.get(taxonomy_idx)),
            enumeration_date: row.get(enum_idx).and_then(parse_enumeration_date),
            authorized_official_last: optional_field(row.get(official_last_idx)),
            authorized_official_first: optional_field(row.get(official_first_idx)),
        };
        providers.entry(normalized).or_insert(record);
        stats.rows_loaded += 1;
    }
    Ok((providers, stats))
}
