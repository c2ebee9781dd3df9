// Signal detection: six independent analytical detectors, each a pure
// reader of the catalog producing flagged-provider records with evidence.

pub mod billing_outlier;
pub mod excluded_provider;
pub mod geographic;
pub mod rapid_escalation;
pub mod shared_official;
pub mod workforce;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::Result;
use crate::primitives::sort::MemSize;
use crate::primitives::{group_sorted, ExternalSorter, ScratchSpace};

pub use billing_outlier::BillingOutlierDetector;
pub use excluded_provider::ExcludedProviderDetector;
pub use geographic::GeographicImplausibilityDetector;
pub use rapid_escalation::RapidEscalationDetector;
pub use shared_official::SharedOfficialDetector;
pub use workforce::WorkforceImpossibilityDetector;

/// The six signal categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    ExcludedProvider,
    BillingOutlier,
    RapidEscalation,
    WorkforceImpossibility,
    SharedOfficial,
    GeographicImplausibility,
}

impl SignalType {
    pub const ALL: [SignalType; 6] = [
        SignalType::ExcludedProvider,
        SignalType::BillingOutlier,
        SignalType::RapidEscalation,
        SignalType::WorkforceImpossibility,
        SignalType::SharedOfficial,
        SignalType::GeographicImplausibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::ExcludedProvider => "excluded_provider",
            SignalType::BillingOutlier => "billing_outlier",
            SignalType::RapidEscalation => "rapid_escalation",
            SignalType::WorkforceImpossibility => "workforce_impossibility",
            SignalType::SharedOfficial => "shared_official",
            SignalType::GeographicImplausibility => "geographic_implausibility",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Investigative priority. Variant order encodes priority, so `min` over a
/// set of severities yields the highest-priority one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

/// Ordered evidence mapping attached to a signal.
pub type Evidence = serde_json::Map<String, serde_json::Value>;

/// Insertion-ordered evidence construction.
#[derive(Default)]
pub struct EvidenceBuilder {
    map: Evidence,
}

impl EvidenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.map.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Evidence {
        self.map
    }
}

/// One detected fraud signal for a provider. Multiple signals may target the
/// same NPI; merging happens only in the report assembler.
#[derive(Debug, Clone, Serialize)]
pub struct FraudSignal {
    pub npi: String,
    pub signal_type: SignalType,
    pub severity: Severity,
    pub evidence: Evidence,
    pub estimated_overpayment: f64,
}

/// Shared read-only context handed to each detector invocation.
pub struct DetectorContext<'a> {
    pub catalog: &'a Catalog,
    pub scratch: Arc<ScratchSpace>,
    pub sort_budget_bytes: usize,
}

impl<'a> DetectorContext<'a> {
    /// A fresh external sorter drawing on the shared scratch space.
    pub fn sorter<T, K, F>(&self, key_of: F) -> ExternalSorter<T, K, F>
    where
        T: Serialize + DeserializeOwned + MemSize,
        K: Ord + Clone,
        F: Fn(&T) -> K,
    {
        ExternalSorter::new(Arc::clone(&self.scratch), self.sort_budget_bytes, key_of)
    }
}

/// A signal detector: a pure function from the catalog to a list of signals.
/// Detectors never depend on each other's output and may run concurrently.
pub trait SignalDetector: Send + Sync {
    fn signal_type(&self) -> SignalType;
    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>>;
}

/// Total paid per billing NPI, sorted by NPI. Used by the outlier and
/// shared-official detectors; each computes it independently (no shared
/// mutable state crosses detector boundaries).
pub(crate) fn billing_totals_by_npi(ctx: &DetectorContext<'_>) -> Result<Vec<(String, f64)>> {
    let mut sorter = ctx.sorter(|row: &(String, f64)| row.0.clone());
    for claim in ctx.catalog.claims() {
        sorter.push((claim.billing_npi.clone(), claim.total_paid))?;
    }
    let mut totals = Vec::new();
    for grouped in group_sorted(sorter.finish()?, |row| row.0.clone()) {
        let (npi, rows) = grouped?;
        totals.push((npi, rows.iter().map(|r| r.1).sum()));
    }
    Ok(totals)
}

/// Deterministic output ordering: primary metric descending, NPI ascending.
pub(crate) fn sort_signals_by_metric_desc(
    signals: &mut [FraudSignal],
    metric: impl Fn(&FraudSignal) -> f64,
) {
    signals.sort_by(|a, b| {
        metric(b)
            .partial_cmp(&metric(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.npi.cmp(&b.npi))
    });
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::NaiveDate;

    use crate::catalog::{ClaimRecord, EntityType, ExclusionRecord, ProviderRecord};
    use crate::primitives::ScratchSpace;

    use super::*;

    pub fn month(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).unwrap()
    }

    pub fn claim(billing: &str, code: &str, when: NaiveDate, paid: f64) -> ClaimRecord {
        ClaimRecord {
            billing_npi: billing.to_string(),
            servicing_npi: billing.to_string(),
            hcpcs_code: code.to_string(),
            claim_month: when,
            unique_beneficiaries: 10,
            claim_count: 50,
            total_paid: paid,
        }
    }

    pub fn provider(npi: &str, entity_type: EntityType) -> ProviderRecord {
        ProviderRecord {
            npi: npi.to_string(),
            entity_type,
            display_name: format!("PROVIDER {npi}"),
            state: Some("NY".to_string()),
            zip_code: Some("10001".to_string()),
            taxonomy_code: Some("207Q00000X".to_string()),
            enumeration_date: None,
            authorized_official_last: None,
            authorized_official_first: None,
        }
    }

    pub fn exclusion(
        npi: &str,
        excluded: Option<NaiveDate>,
        reinstated: Option<NaiveDate>,
    ) -> ExclusionRecord {
        ExclusionRecord {
            npi: npi.to_string(),
            exclusion_type: "1128A1".to_string(),
            exclusion_date: excluded,
            reinstatement_date: reinstated,
        }
    }

    pub fn run_detector(
        detector: &dyn SignalDetector,
        catalog: &Catalog,
    ) -> Vec<FraudSignal> {
        let scratch = Arc::new(ScratchSpace::new(None, 64 * 1024 * 1024).unwrap());
        let ctx = DetectorContext {
            catalog,
            scratch,
            sort_budget_bytes: 1024 * 1024,
        };
        detector.detect(&ctx).unwrap()
    }
}
