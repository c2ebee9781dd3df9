//! Excluded providers that kept billing.
//!
//! A claim matches an exclusion episode when its billing or servicing NPI is
//! in the registry, the claim month is on or after the exclusion date, and
//! the provider has not yet been reinstated (a null reinstatement date means
//! still excluded).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::catalog::npi;
use crate::error::Result;
use crate::primitives::group_sorted;
use crate::primitives::sort::MemSize;
use crate::signals::{
    sort_signals_by_metric_desc, DetectorContext, EvidenceBuilder, FraudSignal, Severity,
    SignalDetector, SignalType,
};

pub struct ExcludedProviderDetector;

/// One claim matched to one exclusion episode, tagged with the side
/// (billing or servicing) that produced the match.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchRow {
    npi: String,
    exclusion_date: NaiveDate,
    reinstatement_date: Option<NaiveDate>,
    exclusion_type: String,
    side: u8,
    claim_month: NaiveDate,
    paid: f64,
}

impl MemSize for MatchRow {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.npi.capacity() + self.exclusion_type.capacity()
    }
}

type EpisodeKey = (String, NaiveDate, Option<NaiveDate>, String, u8);

fn episode_key(row: &MatchRow) -> EpisodeKey {
    (
        row.npi.clone(),
        row.exclusion_date,
        row.reinstatement_date,
        row.exclusion_type.clone(),
        row.side,
    )
}

#[derive(Debug, Clone)]
struct EpisodeAggregate {
    npi: String,
    exclusion_date: NaiveDate,
    reinstatement_date: Option<NaiveDate>,
    exclusion_type: String,
    first_month: NaiveDate,
    total_paid: f64,
}

impl SignalDetector for ExcludedProviderDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::ExcludedProvider
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        let mut sorter = ctx.sorter(episode_key);
        for claim in ctx.catalog.claims() {
            for (side, matched_npi) in
                [(0u8, &claim.billing_npi), (1u8, &claim.servicing_npi)]
            {
                if !npi::is_plausible(matched_npi) {
                    continue;
                }
                for episode in ctx.catalog.exclusions_for(matched_npi) {
                    let Some(exclusion_date) = episode.exclusion_date else {
                        continue;
                    };
                    if claim.claim_month < exclusion_date {
                        continue;
                    }
                    if let Some(reinstated) = episode.reinstatement_date {
                        if claim.claim_month >= reinstated {
                            continue;
                        }
                    }
                    sorter.push(MatchRow {
                        npi: matched_npi.clone(),
                        exclusion_date,
                        reinstatement_date: episode.reinstatement_date,
                        exclusion_type: episode.exclusion_type.clone(),
                        side,
                        claim_month: claim.claim_month,
                        paid: claim.total_paid,
                    })?;
                }
            }
        }

        let mut aggregates: Vec<EpisodeAggregate> = Vec::new();
        for grouped in group_sorted(sorter.finish()?, episode_key) {
            let (_, rows) = grouped?;
            let first = &rows[0];
            let first_month = rows
                .iter()
                .map(|r| r.claim_month)
                .min()
                .unwrap_or(first.claim_month);
            aggregates.push(EpisodeAggregate {
                npi: first.npi.clone(),
                exclusion_date: first.exclusion_date,
                reinstatement_date: first.reinstatement_date,
                exclusion_type: first.exclusion_type.clone(),
                first_month,
                total_paid: rows.iter().map(|r| r.paid).sum(),
            });
        }

        // Billing and servicing matches over the same claim set produce
        // identical adjacent aggregates; keep one, as a UNION would.
        aggregates.dedup_by(|later, earlier| {
            later.npi == earlier.npi
                && later.exclusion_date == earlier.exclusion_date
                && later.reinstatement_date == earlier.reinstatement_date
                && later.exclusion_type == earlier.exclusion_type
                && later.first_month == earlier.first_month
                && later.total_paid == earlier.total_paid
        });

        let mut signals: Vec<FraudSignal> = aggregates
            .into_iter()
            .map(|episode| FraudSignal {
                npi: episode.npi.clone(),
                signal_type: SignalType::ExcludedProvider,
                severity: Severity::Critical,
                evidence: EvidenceBuilder::new()
                    .set("exclusion_date", episode.exclusion_date.to_string())
                    .set("exclusion_type", episode.exclusion_type.clone())
                    .set(
                        "reinstatement_date",
                        episode.reinstatement_date.map(|d| d.to_string()),
                    )
                    .set(
                        "first_post_exclusion_billing",
                        episode.first_month.to_string(),
                    )
                    .set("total_paid_after_exclusion", episode.total_paid)
                    .build(),
                estimated_overpayment: episode.total_paid,
            })
            .collect();
        sort_signals_by_metric_desc(&mut signals, |s| s.estimated_overpayment);
        Ok(signals)
    }
}
