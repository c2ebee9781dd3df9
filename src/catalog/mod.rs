// Read-only tabular sources for one detection run: billing facts, the
// exclusion registry, and the provider registry.

pub mod claims;
pub mod exclusions;
pub mod npi;
pub mod providers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

pub use claims::ClaimRecord;
pub use exclusions::ExclusionRecord;
pub use providers::{EntityType, ProviderRecord};

use crate::error::{EngineError, Result};

/// File names expected inside the data directory.
pub const SPENDING_FILE: &str = "medicaid-provider-spending.csv";
pub const EXCLUSION_FILE: &str = "UPDATED.csv";

/// Row counters for one loaded source.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub rows_loaded: usize,
    pub rows_skipped: usize,
}

/// Aggregate load statistics for the whole catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogStats {
    pub claims: LoadStats,
    pub exclusions: LoadStats,
    pub providers: LoadStats,
    pub distinct_billing_providers: usize,
    /// Billing NPIs that are 10-digit numeric but fail the check digit.
    /// Diagnostic only; these still participate in detection.
    pub luhn_invalid_billing_providers: usize,
}

/// Immutable snapshot of the three datasets for the run's duration.
/// Detectors share it read-only; nothing here mutates after `load`.
#[derive(Debug)]
pub struct Catalog {
    claims: Vec<ClaimRecord>,
    exclusions: HashMap<String, Vec<ExclusionRecord>>,
    providers: BTreeMap<String, ProviderRecord>,
    stats: CatalogStats,
}

impl Catalog {
    /// Loads and validates all three sources. A missing file or missing
    /// required column is fatal; individually malformed rows are skipped.
    pub fn load(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            return Err(EngineError::MissingInput(data_dir.to_path_buf()));
        }

        let spending_path = data_dir.join(SPENDING_FILE);
        let (claims, claim_stats) = claims::load_claims(&spending_path)?;
        info!(
            rows = claim_stats.rows_loaded,
            skipped = claim_stats.rows_skipped,
            "spending data loaded"
        );

        let exclusion_path = data_dir.join(EXCLUSION_FILE);
        let (exclusions, exclusion_stats) = exclusions::load_exclusions(&exclusion_path)?;
        info!(
            rows = exclusion_stats.rows_loaded,
            skipped = exclusion_stats.rows_skipped,
            "exclusion registry loaded"
        );

        let provider_path = providers::find_provider_file(data_dir)?;
        let (providers, provider_stats) = providers::load_providers(&provider_path)?;
        info!(
            rows = provider_stats.rows_loaded,
            skipped = provider_stats.rows_skipped,
            "provider registry loaded"
        );

        let catalog = Self::assemble(
            claims,
            exclusions,
            providers,
            claim_stats,
            exclusion_stats,
            provider_stats,
        );
        if catalog.stats.luhn_invalid_billing_providers > 0 {
            info!(
                count = catalog.stats.luhn_invalid_billing_providers,
                "billing NPIs failing the check digit (retained)"
            );
        }
        Ok(catalog)
    }

    /// Builds a catalog directly from records. Used by tests and callers
    /// that produce records programmatically.
    pub fn from_records(
        claims: Vec<ClaimRecord>,
        exclusion_records: Vec<ExclusionRecord>,
        provider_records: Vec<ProviderRecord>,
    ) -> Self {
        let mut exclusions: HashMap<String, Vec<ExclusionRecord>> = HashMap::new();
        for record in exclusion_records {
            exclusions.entry(record.npi.clone()).or_default().push(record);
        }
        let mut providers = BTreeMap::new();
        for record in provider_records {
            providers.entry(record.npi.clone()).or_insert(record);
        }
        Self::assemble(
            claims,
            exclusions,
            providers,
            LoadStats::default(),
            LoadStats::default(),
            LoadStats::default(),
        )
    }

    fn assemble(
        claims: Vec<ClaimRecord>,
        exclusions: HashMap<String, Vec<ExclusionRecord>>,
        providers: BTreeMap<String, ProviderRecord>,
        claim_stats: LoadStats,
        exclusion_stats: LoadStats,
        provider_stats: LoadStats,
    ) -> Self {
        let distinct_billing: HashSet<&str> =
            claims.iter().map(|c| c.billing_npi.as_str()).collect();
        let luhn_invalid = distinct_billing
            .iter()
            .filter(|n| npi::is_plausible(n) && !npi::is_luhn_valid(n))
            .count();
        let stats = CatalogStats {
            claims: claim_stats,
            exclusions: exclusion_stats,
            providers: provider_stats,
            distinct_billing_providers: distinct_billing.len(),
            luhn_invalid_billing_providers: luhn_invalid,
        };
        Self {
            claims,
            exclusions,
            providers,
            stats,
        }
    }

    /// All fact rows, in file order.
    pub fn claims(&self) -> &[ClaimRecord] {
        &self.claims
    }

    /// Fact rows whose claim month falls within `[start, end]`.
    pub fn claims_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Iterator<Item = &ClaimRecord> {
        self.claims
            .iter()
            .filter(move |c| c.claim_month >= start && c.claim_month <= end)
    }

    /// Registry row for one NPI, if present.
    pub fn provider(&self, npi: &str) -> Option<&ProviderRecord> {
        self.providers.get(npi)
    }

    /// All registry rows, ordered by NPI.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderRecord> {
        self.providers.values()
    }

    /// Exclusion episodes recorded for one NPI.
    pub fn exclusions_for(&self, npi: &str) -> &[ExclusionRecord] {
        self.exclusions
            .get(npi)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Distinct billing NPIs observed in the fact table.
    pub fn distinct_billing_providers(&self) -> usize {
        self.stats.distinct_billing_providers
    }

    pub fn stats(&self) -> &CatalogStats {
        &self.stats
    }
}

/// Resolves a required column by header name, trimming header whitespace.
pub(crate) fn header_index(
    headers: &csv::StringRecord,
    file: &str,
    name: &str,
) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| EngineError::MissingColumn {
            file: file.to_string(),
            column: name.to_string(),
        })
}
