//! Home-health billing volumes implausible for the beneficiary pool.
//!
//! A small beneficiary pool billed at high volume (low beneficiary-to-claims
//! ratio) is a red flag for phantom billing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::npi;
use crate::config::GeographicSettings;
use crate::error::Result;
use crate::primitives::group_sorted;
use crate::primitives::sort::MemSize;
use crate::signals::{
    DetectorContext, EvidenceBuilder, FraudSignal, Severity, SignalDetector, SignalType,
};

/// Home-health HCPCS codes in scope for this signal.
pub const HOME_HEALTH_CODES: [&str; 21] = [
    "G0151", "G0152", "G0153", "G0154", "G0155", "G0156", "G0157", "G0158", "G0159",
    "G0160", "G0161", "G0162", "G0299", "G0300", "S9122", "S9123", "S9124", "T1019",
    "T1020", "T1021", "T1022",
];

pub struct GeographicImplausibilityDetector {
    settings: GeographicSettings,
}

impl GeographicImplausibilityDetector {
    pub fn new(settings: GeographicSettings) -> Self {
        Self { settings }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeoRow {
    npi: String,
    state: String,
    code: String,
    month: NaiveDate,
    claims: u64,
    beneficiaries: u64,
}

impl MemSize for GeoRow {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.npi.capacity()
            + self.state.capacity()
            + self.code.capacity()
    }
}

struct FlaggedRow {
    npi: String,
    state: String,
    month: NaiveDate,
    code: String,
    claims: u64,
    beneficiaries: u64,
}

impl SignalDetector for GeographicImplausibilityDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::GeographicImplausibility
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        let mut sorter = ctx.sorter(|row: &GeoRow| {
            (row.npi.clone(), row.state.clone(), row.code.clone(), row.month)
        });
        for claim in ctx.catalog.claims() {
            if !HOME_HEALTH_CODES.contains(&claim.hcpcs_code.as_str()) {
                continue;
            }
            if !npi::is_plausible(&claim.billing_npi) {
                continue;
            }
            // Inner join to the registry: providers without a registry row
            // have no state to group by and are dropped.
            let Some(provider) = ctx.catalog.provider(&claim.billing_npi) else {
                continue;
            };
            sorter.push(GeoRow {
                npi: claim.billing_npi.clone(),
                state: provider
                    .state
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                code: claim.hcpcs_code.clone(),
                month: claim.claim_month,
                claims: claim.claim_count,
                beneficiaries: claim.unique_beneficiaries,
            })?;
        }

        // Per (provider, state, code, month) rows above the claim floor with
        // a low beneficiary ratio.
        let mut flagged: Vec<FlaggedRow> = Vec::new();
        let grouped = group_sorted(sorter.finish()?, |row: &GeoRow| {
            (row.npi.clone(), row.state.clone(), row.code.clone(), row.month)
        });
        for group in grouped {
            let ((provider_npi, state, code, month), rows) = group?;
            let claims: u64 = rows.iter().map(|r| r.claims).sum();
            let beneficiaries: u64 = rows.iter().map(|r| r.beneficiaries).sum();
            if claims <= self.settings.min_monthly_claims || claims == 0 {
                continue;
            }
            let ratio = beneficiaries as f64 / claims as f64;
            if ratio >= self.settings.max_beneficiary_ratio {
                continue;
            }
            flagged.push(FlaggedRow {
                npi: provider_npi,
                state,
                month,
                code,
                claims,
                beneficiaries,
            });
        }

        // One signal per (provider, state, month), listing every offending
        // code for that month.
        flagged.sort_by(|a, b| {
            (&a.npi, &a.state, a.month, &a.code).cmp(&(&b.npi, &b.state, b.month, &b.code))
        });
        let mut signals = Vec::new();
        let mut idx = 0;
        while idx < flagged.len() {
            let start = idx;
            while idx < flagged.len()
                && flagged[idx].npi == flagged[start].npi
                && flagged[idx].state == flagged[start].state
                && flagged[idx].month == flagged[start].month
            {
                idx += 1;
            }
            let rows = &flagged[start..idx];
            let claims: u64 = rows.iter().map(|r| r.claims).sum();
            let beneficiaries: u64 = rows.iter().map(|r| r.beneficiaries).sum();
            let ratio = beneficiaries as f64 / claims as f64;
            let codes: Vec<String> = rows.iter().map(|r| r.code.clone()).collect();
            signals.push(FraudSignal {
                npi: rows[0].npi.clone(),
                signal_type: SignalType::GeographicImplausibility,
                severity: Severity::Medium,
                evidence: EvidenceBuilder::new()
                    .set("state", rows[0].state.clone())
                    .set("flagged_hcpcs_codes", codes)
                    .set("flagged_month", rows[0].month.to_string())
                    .set("claims_count", claims)
                    .set("unique_beneficiaries", beneficiaries)
                    .set("beneficiary_to_claims_ratio", ratio)
                    .build(),
                estimated_overpayment: 0.0,
            });
        }

        // Lowest ratio first; these are the strongest candidates.
        signals.sort_by(|a, b| {
            let ratio_a = a
                .evidence
                .get("beneficiary_to_claims_ratio")
                .and_then(|v| v.as_f64())
                .unwrap_or(f64::MAX);
            let ratio_b = b
                .evidence
                .get("beneficiary_to_claims_ratio")
                .and_then(|v| v.as_f64())
                .unwrap_or(f64::MAX);
            ratio_a
                .partial_cmp(&ratio_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.npi.cmp(&b.npi))
        });
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, EntityType};
    use crate::signals::testutil::{claim, month, provider, run_detector};

    use super::*;

    fn home_health_claim(
        provider_npi: &str,
        code: &str,
        claims: u64,
        beneficiaries: u64,
    ) -> crate::catalog::ClaimRecord {
        let mut record = claim(provider_npi, code, month(2024, 6), 10_000.0);
        record.claim_count = claims;
        record.unique_beneficiaries = beneficiaries;
        record
    }

    #[test]
    fn flags_low_beneficiary_ratio_across_codes_in_one_month() {
        let catalog = Catalog::from_records(
            vec![
                home_health_claim("1234567890", "G0151", 200, 10),
                home_health_claim("1234567890", "T1019", 350, 8),
            ],
            vec![],
            vec![provider("1234567890", EntityType::Organization)],
        );
        let detector = GeographicImplausibilityDetector::new(GeographicSettings::default());
        let signals = run_detector(&detector, &catalog);
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.severity, Severity::Medium);
        assert_eq!(signal.estimated_overpayment, 0.0);
        let ratio = signal
            .evidence
            .get("beneficiary_to_claims_ratio")
            .unwrap()
            .as_f64()
            .unwrap();
        assert!(ratio < 0.1);
        let codes = signal
            .evidence
            .get("flagged_hcpcs_codes")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn low_volume_is_not_evaluated() {
        let catalog = Catalog::from_records(
            vec![home_health_claim("1234567890", "G0151", 90, 2)],
            vec![],
            vec![provider("1234567890", EntityType::Organization)],
        );
        let detector = GeographicImplausibilityDetector::new(GeographicSettings::default());
        assert!(run_detector(&detector, &catalog).is_empty());
    }

    #[test]
    fn healthy_ratio_is_not_flagged() {
        let catalog = Catalog::from_records(
            vec![home_health_claim("1234567890", "G0151", 200, 150)],
            vec![],
            vec![provider("1234567890", EntityType::Organization)],
        );
        let detector = GeographicImplausibilityDetector::new(GeographicSettings::default());
        assert!(run_detector(&detector, &catalog).is_empty());
    }

    #[test]
    fn non_home_health_codes_are_out_of_scope() {
        let catalog = Catalog::from_records(
            vec![home_health_claim("1234567890", "99213", 500, 5)],
            vec![],
            vec![provider("1234567890", EntityType::Organization)],
        );
        let detector = GeographicImplausibilityDetector::new(GeographicSettings::default());
        assert!(run_detector(&detector, &catalog).is_empty());
    }

    #[test]
    fn providers_missing_from_registry_are_dropped() {
        let catalog = Catalog::from_records(
            vec![home_health_claim("1234567890", "G0151", 500, 5)],
            vec![],
            vec![],
        );
        let detector = GeographicImplausibilityDetector::new(GeographicSettings::default());
        assert!(run_detector(&detector, &catalog).is_empty());
    }
}
