//! Physically impossible claim volumes for organizational providers.

use chrono::NaiveDate;

use crate::catalog::{npi, EntityType};
use crate::config::WorkforceSettings;
use crate::error::Result;
use crate::primitives::group_sorted;
use crate::signals::{
    DetectorContext, EvidenceBuilder, FraudSignal, Severity, SignalDetector, SignalType,
};

pub struct WorkforceImpossibilityDetector {
    settings: WorkforceSettings,
}

impl WorkforceImpossibilityDetector {
    pub fn new(settings: WorkforceSettings) -> Self {
        Self { settings }
    }
}

impl SignalDetector for WorkforceImpossibilityDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::WorkforceImpossibility
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        let mut sorter =
            ctx.sorter(|row: &(String, NaiveDate, u64, f64)| (row.0.clone(), row.1));
        for claim in ctx.catalog.claims() {
            if !npi::is_plausible(&claim.billing_npi) {
                continue;
            }
            let is_organization = ctx
                .catalog
                .provider(&claim.billing_npi)
                .map(|p| p.entity_type == EntityType::Organization)
                .unwrap_or(false);
            if !is_organization {
                continue;
            }
            sorter.push((
                claim.billing_npi.clone(),
                claim.claim_month,
                claim.claim_count,
                claim.total_paid,
            ))?;
        }

        let monthly_hours =
            (self.settings.working_days_per_month * self.settings.working_hours_per_day) as f64;
        let plausible_claims = self.settings.plausible_monthly_claims();

        let mut ranked: Vec<(f64, FraudSignal)> = Vec::new();
        for grouped in group_sorted(sorter.finish()?, |row| row.0.clone()) {
            let (provider_npi, rows) = grouped?;
            // Aggregate per month (rows are month-ordered), then take the
            // peak month by claim count; earlier month wins ties.
            let mut peak: Option<(NaiveDate, u64, f64)> = None;
            let mut current: Option<(NaiveDate, u64, f64)> = None;
            for (_, claim_month, claims, paid) in rows {
                match current.as_mut() {
                    Some(entry) if entry.0 == claim_month => {
                        entry.1 += claims;
                        entry.2 += paid;
                    }
                    _ => {
                        if let Some(finished) = current.take() {
                            peak = pick_peak(peak, finished);
                        }
                        current = Some((claim_month, claims, paid));
                    }
                }
            }
            if let Some(finished) = current.take() {
                peak = pick_peak(peak, finished);
            }

            let Some((peak_month, peak_claims, peak_paid)) = peak else {
                continue;
            };
            if peak_claims == 0 {
                continue;
            }
            let claims_per_hour = peak_claims as f64 / monthly_hours;
            if claims_per_hour <= self.settings.max_claims_per_hour {
                continue;
            }
            let excess_claims = (peak_claims as f64 - plausible_claims).max(0.0);
            let average_claim_value = peak_paid / peak_claims as f64;
            ranked.push((
                claims_per_hour,
                FraudSignal {
                    npi: provider_npi,
                    signal_type: SignalType::WorkforceImpossibility,
                    severity: Severity::High,
                    evidence: EvidenceBuilder::new()
                        .set("peak_month", peak_month.to_string())
                        .set("peak_claims_count", peak_claims)
                        .set("implied_claims_per_hour", claims_per_hour)
                        .set("total_paid_peak_month", peak_paid)
                        .build(),
                    estimated_overpayment: excess_claims * average_claim_value,
                },
            ));
        }

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.npi.cmp(&b.1.npi))
        });
        Ok(ranked.into_iter().map(|(_, signal)| signal).collect())
    }
}

fn pick_peak(
    best: Option<(NaiveDate, u64, f64)>,
    candidate: (NaiveDate, u64, f64),
) -> Option<(NaiveDate, u64, f64)> {
    match best {
        None => Some(candidate),
        Some(current) if candidate.1 > current.1 => Some(candidate),
        Some(current) => Some(current),
    }
}
