//! Billing volume outliers against the (taxonomy, state) peer group.

use serde::{Deserialize, Serialize};

use crate::catalog::npi;
use crate::config::OutlierSettings;
use crate::error::Result;
use crate::primitives::percentile::peer_stats;
use crate::primitives::sort::MemSize;
use crate::primitives::{group_sorted, merge_join, JoinKind};
use crate::signals::{
    billing_totals_by_npi, sort_signals_by_metric_desc, DetectorContext, EvidenceBuilder,
    FraudSignal, Severity, SignalDetector, SignalType,
};

pub struct BillingOutlierDetector {
    settings: OutlierSettings,
}

impl BillingOutlierDetector {
    pub fn new(settings: OutlierSettings) -> Self {
        Self { settings }
    }
}

/// Provider total joined to its peer-group key. Providers missing from the
/// registry group under "UNKNOWN".
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerRow {
    taxonomy: String,
    state: String,
    npi: String,
    total_paid: f64,
}

impl MemSize for PeerRow {
    fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.taxonomy.capacity()
            + self.state.capacity()
            + self.npi.capacity()
    }
}

impl SignalDetector for BillingOutlierDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::BillingOutlier
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        let totals = billing_totals_by_npi(ctx)?;

        // Left join provider taxonomy/state; both streams are NPI-sorted.
        let provider_rows = ctx.catalog.providers().map(|p| {
            Ok((
                p.npi.clone(),
                p.taxonomy_code
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                p.state.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            ))
        });
        let joined = merge_join(
            totals.into_iter().map(Ok),
            provider_rows,
            |left: &(String, f64)| left.0.clone(),
            |right: &(String, String, String)| right.0.clone(),
            JoinKind::Left,
        );

        let mut peer_sorter =
            ctx.sorter(|row: &PeerRow| (row.taxonomy.clone(), row.state.clone()));
        for pair in joined {
            let ((provider_npi, total_paid), registry) = pair?;
            if !npi::is_plausible(&provider_npi) {
                continue;
            }
            let (taxonomy, state) = match registry {
                Some((_, taxonomy, state)) => (taxonomy, state),
                None => ("UNKNOWN".to_string(), "UNKNOWN".to_string()),
            };
            peer_sorter.push(PeerRow {
                taxonomy,
                state,
                npi: provider_npi,
                total_paid,
            })?;
        }

        let mut signals = Vec::new();
        let grouped = group_sorted(peer_sorter.finish()?, |row: &PeerRow| {
            (row.taxonomy.clone(), row.state.clone())
        });
        for group in grouped {
            let ((taxonomy, state), members) = group?;
            let mut values: Vec<f64> = members.iter().map(|m| m.total_paid).collect();
            let Some(stats) = peer_stats(
                &mut values,
                self.settings.flag_percentile,
                self.settings.min_peer_group_size,
            ) else {
                continue;
            };
            for member in &members {
                if member.total_paid <= stats.upper {
                    continue;
                }
                // Zero median makes the ratio undefined; the row is excluded
                // from this signal's candidates.
                if stats.median <= 0.0 {
                    continue;
                }
                let ratio = member.total_paid / stats.median;
                let severity = if ratio > self.settings.high_ratio_to_median {
                    Severity::High
                } else {
                    Severity::Medium
                };
                signals.push(FraudSignal {
                    npi: member.npi.clone(),
                    signal_type: SignalType::BillingOutlier,
                    severity,
                    evidence: EvidenceBuilder::new()
                        .set("total_paid", member.total_paid)
                        .set("taxonomy_code", taxonomy.clone())
                        .set("state", state.clone())
                        .set("peer_group_median", stats.median)
                        .set("peer_group_99th_percentile", stats.upper)
                        .set("ratio_to_peer_median", ratio)
                        .build(),
                    estimated_overpayment: (member.total_paid - stats.upper).max(0.0),
                });
            }
        }
        sort_signals_by_metric_desc(&mut signals, |s| {
            s.evidence
                .get("total_paid")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        });
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, EntityType};
    use crate::signals::testutil::{claim, month, provider, run_detector};

    use super::*;

    fn peer_catalog(outlier_total: f64, peer_count: usize) -> Catalog {
        let mut claims = Vec::new();
        let mut providers = Vec::new();
        for i in 0..peer_count {
            let provider_npi = format!("10000000{i:02}");
            claims.push(claim(&provider_npi, "99213", month(2024, 1), 100_000.0));
            providers.push(provider(&provider_npi, EntityType::Individual));
        }
        claims.push(claim("1999999999", "99213", month(2024, 1), outlier_total));
        providers.push(provider("1999999999", EntityType::Individual));
        Catalog::from_records(claims, vec![], providers)
    }

    #[test]
    fn flags_extreme_outlier_with_high_severity() {
        let catalog = peer_catalog(10_000_000.0, 10);
        let detector = BillingOutlierDetector::new(OutlierSettings::default());
        let signals = run_detector(&detector, &catalog);
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.npi, "1999999999");
        assert_eq!(signal.severity, Severity::High);
        let ratio = signal
            .evidence
            .get("ratio_to_peer_median")
            .unwrap()
            .as_f64()
            .unwrap();
        assert!(ratio > 5.0);
        assert!(signal.estimated_overpayment > 0.0);
    }

    #[test]
    fn thin_peer_groups_are_not_compared() {
        // 5 peers + outlier = 6 providers, below the minimum of 10.
        let catalog = peer_catalog(10_000_000.0, 5);
        let detector = BillingOutlierDetector::new(OutlierSettings::default());
        let signals = run_detector(&detector, &catalog);
        assert!(signals.is_empty());
    }

    #[test]
    fn moderate_outlier_gets_medium_severity() {
        // Outlier above the 99th percentile but under 5x the median.
        let catalog = peer_catalog(450_000.0, 12);
        let detector = BillingOutlierDetector::new(OutlierSettings::default());
        let signals = run_detector(&detector, &catalog);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, Severity::Medium);
    }

    #[test]
    fn unregistered_providers_group_under_unknown() {
        // No provider registry at all: every total lands in the UNKNOWN
        // (taxonomy, state) group, which is still a valid peer group.
        let mut claims = Vec::new();
        for i in 0..11 {
            claims.push(claim(
                &format!("10000000{i:02}"),
                "99213",
                month(2024, 1),
                100_000.0,
            ));
        }
        claims.push(claim("1999999999", "99213", month(2024, 1), 9_000_000.0));
        let catalog = Catalog::from_records(claims, vec![], vec![]);
        let detector = BillingOutlierDetector::new(OutlierSettings::default());
        let signals = run_detector(&detector, &catalog);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].evidence["taxonomy_code"], "UNKNOWN");
    }
}
