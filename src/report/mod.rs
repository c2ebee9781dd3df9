// Report assembly: merges per-provider signals across detectors, joins back
// provider identity and billing context, and serializes the final document.

pub mod fca;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::catalog::{Catalog, EntityType};
use crate::error::Result;
use crate::signals::{Evidence, FraudSignal, Severity, SignalType};

pub use fca::FcaRelevance;

/// One signal as it appears inside a flagged-provider entry.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEntry {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub evidence: Evidence,
}

/// One flagged provider with merged signals and billing context. Built fresh
/// for every run; nothing persists across runs.
#[derive(Debug, Clone, Serialize)]
pub struct FlaggedProvider {
    pub npi: String,
    pub provider_name: String,
    pub entity_type: EntityType,
    pub taxonomy_code: Option<String>,
    pub state: Option<String>,
    pub enumeration_date: Option<NaiveDate>,
    pub total_paid_all_time: f64,
    pub total_claims_all_time: u64,
    pub total_unique_beneficiaries_all_time: u64,
    pub signals: Vec<SignalEntry>,
    pub highest_severity: Severity,
    pub estimated_overpayment_usd: f64,
    pub fca_relevance: FcaRelevance,
}

/// The final report document.
#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: String,
    pub tool_version: String,
    pub total_providers_scanned: usize,
    pub total_providers_flagged: usize,
    pub signal_counts: BTreeMap<SignalType, usize>,
    pub flagged_providers: Vec<FlaggedProvider>,
}

#[derive(Default, Clone, Copy)]
struct BillingContext {
    total_paid: f64,
    total_claims: u64,
    total_beneficiaries: u64,
}

/// Owns the final report structure until it is handed to the writer.
pub struct ReportAssembler<'a> {
    catalog: &'a Catalog,
}

impl<'a> ReportAssembler<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn assemble(
        &self,
        signals_by_type: &BTreeMap<SignalType, Vec<FraudSignal>>,
    ) -> Report {
        let mut signal_counts = BTreeMap::new();
        for signal_type in SignalType::ALL {
            signal_counts.insert(
                signal_type,
                signals_by_type
                    .get(&signal_type)
                    .map(Vec::len)
                    .unwrap_or(0),
            );
        }

        // Group signals by NPI, visiting types in their fixed order so the
        // primary signal per provider is deterministic.
        let mut by_npi: BTreeMap<&str, Vec<&FraudSignal>> = BTreeMap::new();
        for signal_type in SignalType::ALL {
            let Some(signals) = signals_by_type.get(&signal_type) else {
                continue;
            };
            for signal in signals {
                by_npi.entry(signal.npi.as_str()).or_default().push(signal);
            }
        }

        // Billing context for every flagged provider in a single pass over
        // the fact table, instead of a lookup per provider.
        let flagged: HashSet<&str> = by_npi.keys().copied().collect();
        let mut contexts: HashMap<&str, BillingContext> = HashMap::new();
        for claim in self.catalog.claims() {
            if let Some(&key) = flagged.get(claim.billing_npi.as_str()) {
                let entry = contexts.entry(key).or_default();
                entry.total_paid += claim.total_paid;
                entry.total_claims += claim.claim_count;
                entry.total_beneficiaries += claim.unique_beneficiaries;
            }
        }

        let mut flagged_providers: Vec<FlaggedProvider> = by_npi
            .iter()
            .map(|(provider_npi, signals)| {
                let provider = self.catalog.provider(provider_npi);
                let context = contexts
                    .get(provider_npi)
                    .copied()
                    .unwrap_or_default();
                let highest_severity = signals
                    .iter()
                    .map(|s| s.severity)
                    .min()
                    .unwrap_or(Severity::Medium);
                let total_overpayment: f64 =
                    signals.iter().map(|s| s.estimated_overpayment).sum();
                let primary = signals[0];
                FlaggedProvider {
                    npi: (*provider_npi).to_string(),
                    provider_name: provider
                        .map(|p| p.display_name.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    entity_type: provider
                        .map(|p| p.entity_type)
                        .unwrap_or(EntityType::Unknown),
                    taxonomy_code: provider.and_then(|p| p.taxonomy_code.clone()),
                    state: provider.and_then(|p| p.state.clone()),
                    enumeration_date: provider.and_then(|p| p.enumeration_date),
                    total_paid_all_time: context.total_paid,
                    total_claims_all_time: context.total_claims,
                    total_unique_beneficiaries_all_time: context.total_beneficiaries,
                    signals: signals
                        .iter()
                        .map(|s| SignalEntry {
                            signal_type: s.signal_type,
                            severity: s.severity,
                            evidence: s.evidence.clone(),
                        })
                        .collect(),
                    highest_severity,
                    estimated_overpayment_usd: total_overpayment,
                    fca_relevance: fca::relevance_for(primary, provider),
                }
            })
            .collect();

        // Largest estimated overpayment first; NPI breaks ties so repeated
        // runs emit byte-identical reports.
        flagged_providers.sort_by(|a, b| {
            b.estimated_overpayment_usd
                .partial_cmp(&a.estimated_overpayment_usd)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.npi.cmp(&b.npi))
        });

        Report {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            total_providers_scanned: self.catalog.distinct_billing_providers(),
            total_providers_flagged: flagged_providers.len(),
            signal_counts,
            flagged_providers,
        }
    }
}

/// Writes the report as pretty-printed JSON, creating parent directories as
/// needed.
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    info!(path = %path.display(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::ClaimRecord;
    use crate::signals::EvidenceBuilder;

    use super::*;

    fn claim(billing: &str, paid: f64) -> ClaimRecord {
        ClaimRecord {
            billing_npi: billing.to_string(),
            servicing_npi: billing.to_string(),
            hcpcs_code: "99213".to_string(),
            claim_month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            unique_beneficiaries: 5,
            claim_count: 20,
            total_paid: paid,
        }
    }

    fn signal(npi: &str, signal_type: SignalType, severity: Severity, overpayment: f64) -> FraudSignal {
        FraudSignal {
            npi: npi.to_string(),
            signal_type,
            severity,
            evidence: EvidenceBuilder::new().set("note", "test").build(),
            estimated_overpayment: overpayment,
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_records(
            vec![
                claim("1234567890", 5_000.0),
                claim("1234567890", 2_500.0),
                claim("9999999999", 1_000.0),
            ],
            vec![],
            vec![],
        )
    }

    #[test]
    fn merges_signals_per_provider_and_sums_overpayment() {
        let catalog = catalog();
        let mut signals_by_type = BTreeMap::new();
        signals_by_type.insert(
            SignalType::ExcludedProvider,
            vec![signal(
                "1234567890",
                SignalType::ExcludedProvider,
                Severity::Critical,
                7_500.0,
            )],
        );
        signals_by_type.insert(
            SignalType::BillingOutlier,
            vec![signal(
                "1234567890",
                SignalType::BillingOutlier,
                Severity::Medium,
                1_000.0,
            )],
        );

        let report = ReportAssembler::new(&catalog).assemble(&signals_by_type);
        assert_eq!(report.total_providers_scanned, 2);
        assert_eq!(report.total_providers_flagged, 1);
        let entry = &report.flagged_providers[0];
        assert_eq!(entry.signals.len(), 2);
        assert_eq!(entry.estimated_overpayment_usd, 8_500.0);
        assert_eq!(entry.highest_severity, Severity::Critical);
        assert_eq!(entry.total_paid_all_time, 7_500.0);
        assert_eq!(entry.total_claims_all_time, 40);
        // primary signal drives the statute mapping
        assert_eq!(
            entry.fca_relevance.statute_reference,
            "31 U.S.C. § 3729(a)(1)(A)"
        );
    }

    #[test]
    fn orders_by_overpayment_with_npi_tiebreak() {
        let catalog = catalog();
        let mut signals_by_type = BTreeMap::new();
        signals_by_type.insert(
            SignalType::BillingOutlier,
            vec![
                signal("9999999999", SignalType::BillingOutlier, Severity::High, 100.0),
                signal("1234567890", SignalType::BillingOutlier, Severity::High, 100.0),
            ],
        );
        let report = ReportAssembler::new(&catalog).assemble(&signals_by_type);
        let order: Vec<&str> = report
            .flagged_providers
            .iter()
            .map(|p| p.npi.as_str())
            .collect();
        assert_eq!(order, vec!["1234567890", "9999999999"]);
    }

    #[test]
    fn signal_counts_always_carry_all_six_types() {
        let catalog = catalog();
        let report = ReportAssembler::new(&catalog).assemble(&BTreeMap::new());
        assert_eq!(report.signal_counts.len(), 6);
        assert!(report.signal_counts.values().all(|count| *count == 0));
        assert!(report.flagged_providers.is_empty());
    }

    #[test]
    fn report_serializes_with_snake_case_signal_keys() {
        let catalog = catalog();
        let report = ReportAssembler::new(&catalog).assemble(&BTreeMap::new());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["signal_counts"].get("excluded_provider").is_some());
        assert!(json["signal_counts"].get("geographic_implausibility").is_some());
    }
}
