//! Rapid billing escalation.
//!
//! Two incompatible historical definitions of this signal exist; the
//! month-over-month rule is the default and the new-entity rolling-average
//! rule is selectable via `escalation.variant` in `fraudsift.toml`. They
//! produce different flagged sets.

use chrono::{Months, NaiveDate};

use crate::catalog::npi;
use crate::config::{EscalationSettings, EscalationVariant};
use crate::error::Result;
use crate::primitives::group_sorted;
use crate::primitives::window::{growth_pct, lag, rolling_average};
use crate::signals::{
    DetectorContext, EvidenceBuilder, FraudSignal, Severity, SignalDetector, SignalType,
};

pub struct RapidEscalationDetector {
    settings: EscalationSettings,
}

impl RapidEscalationDetector {
    pub fn new(settings: EscalationSettings) -> Self {
        Self { settings }
    }

    /// Default definition: any observed month whose total exceeds the
    /// immediately preceding observed month by more than the growth
    /// threshold, with the prior month at or above the dollar floor.
    fn detect_month_over_month(
        &self,
        provider_npi: &str,
        series: &[(NaiveDate, f64)],
        out: &mut Vec<(f64, FraudSignal)>,
    ) {
        let lagged = lag(series, 1);
        for (idx, entry) in series.iter().enumerate() {
            let Some((prior_month, prior_paid)) = lagged[idx] else {
                continue;
            };
            if prior_paid < self.settings.min_prior_month_paid {
                continue;
            }
            let Some(growth) = growth_pct(prior_paid, entry.1) else {
                continue;
            };
            if growth <= self.settings.growth_threshold_pct {
                continue;
            }
            let severity = if growth > self.settings.high_growth_pct {
                Severity::High
            } else {
                Severity::Medium
            };
            let signal = FraudSignal {
                npi: provider_npi.to_string(),
                signal_type: SignalType::RapidEscalation,
                severity,
                evidence: EvidenceBuilder::new()
                    .set("prior_month", prior_month.to_string())
                    .set("flagged_month", entry.0.to_string())
                    .set("prior_month_paid", prior_paid)
                    .set("flagged_month_paid", entry.1)
                    .set("growth_pct", growth)
                    .build(),
                estimated_overpayment: entry.1 - prior_paid,
            };
            out.push((growth, signal));
        }
    }

    /// Variant definition: providers enumerated shortly before their first
    /// billing month, evaluated on the rolling average of month-over-month
    /// growth across their leading billing months.
    fn detect_new_entity_rolling(
        &self,
        ctx: &DetectorContext<'_>,
        provider_npi: &str,
        series: &[(NaiveDate, f64)],
        out: &mut Vec<(f64, FraudSignal)>,
    ) {
        let Some(provider) = ctx.catalog.provider(provider_npi) else {
            return;
        };
        let Some(enumeration_date) = provider.enumeration_date else {
            return;
        };
        let first_billing = series[0].0;
        let Some(window_end) = enumeration_date
            .checked_add_months(Months::new(self.settings.enumeration_window_months))
        else {
            return;
        };
        if first_billing > window_end {
            return;
        }

        let observed = &series[..series.len().min(self.settings.observed_months)];
        let paid: Vec<f64> = observed.iter().map(|m| m.1).collect();
        let growths: Vec<f64> = (1..paid.len())
            .filter_map(|idx| growth_pct(paid[idx - 1], paid[idx]))
            .collect();
        if growths.is_empty() {
            return;
        }
        let rolled = rolling_average(&growths, self.settings.rolling_window);
        let peak = rolled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if peak <= self.settings.rolling_growth_threshold_pct {
            return;
        }
        let severity = if peak > self.settings.rolling_high_growth_pct {
            Severity::High
        } else {
            Severity::Medium
        };
        let signal = FraudSignal {
            npi: provider_npi.to_string(),
            signal_type: SignalType::RapidEscalation,
            severity,
            evidence: EvidenceBuilder::new()
                .set("enumeration_date", enumeration_date.to_string())
                .set("first_billing_month", first_billing.to_string())
                .set("monthly_paid_first_12", paid.clone())
                .set("peak_3_month_growth_rate_pct", peak)
                .build(),
            estimated_overpayment: paid.iter().sum(),
        };
        out.push((peak, signal));
    }
}

impl SignalDetector for RapidEscalationDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::RapidEscalation
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        let mut sorter =
            ctx.sorter(|row: &(String, NaiveDate, f64)| (row.0.clone(), row.1));
        for claim in ctx.catalog.claims() {
            if !npi::is_plausible(&claim.billing_npi) {
                continue;
            }
            sorter.push((
                claim.billing_npi.clone(),
                claim.claim_month,
                claim.total_paid,
            ))?;
        }

        let mut ranked: Vec<(f64, FraudSignal)> = Vec::new();
        for grouped in group_sorted(sorter.finish()?, |row| row.0.clone()) {
            let (provider_npi, rows) = grouped?;
            // Rows arrive ordered by month; collapse repeats per month.
            let mut series: Vec<(NaiveDate, f64)> = Vec::new();
            for (_, claim_month, paid) in rows {
                match series.last_mut() {
                    Some(last) if last.0 == claim_month => last.1 += paid,
                    _ => series.push((claim_month, paid)),
                }
            }
            if series.len() < 2 {
                continue;
            }
            match self.settings.variant {
                EscalationVariant::MonthOverMonth => {
                    self.detect_month_over_month(&provider_npi, &series, &mut ranked)
                }
                EscalationVariant::NewEntityRolling => {
                    self.detect_new_entity_rolling(ctx, &provider_npi, &series, &mut ranked)
                }
            }
        }

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.npi.cmp(&b.1.npi))
        });
        Ok(ranked.into_iter().map(|(_, signal)| signal).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, EntityType};
    use crate::signals::testutil::{claim, month, provider, run_detector};

    use super::*;

    fn detector(variant: EscalationVariant) -> RapidEscalationDetector {
        RapidEscalationDetector::new(EscalationSettings {
            variant,
            ..EscalationSettings::default()
        })
    }

    #[test]
    fn flags_month_over_month_spike_above_threshold() {
        let catalog = Catalog::from_records(
            vec![
                claim("1234567890", "99213", month(2024, 1), 2_000.0),
                claim("1234567890", "99213", month(2024, 2), 13_000.0),
            ],
            vec![],
            vec![],
        );
        let signals = run_detector(&detector(EscalationVariant::MonthOverMonth), &catalog);
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.severity, Severity::Medium);
        assert_eq!(signal.estimated_overpayment, 11_000.0);
        let growth = signal.evidence.get("growth_pct").unwrap().as_f64().unwrap();
        assert!((growth - 550.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_growth_escalates_to_high() {
        let catalog = Catalog::from_records(
            vec![
                claim("1234567890", "99213", month(2024, 1), 1_000.0),
                claim("1234567890", "99213", month(2024, 2), 20_000.0),
            ],
            vec![],
            vec![],
        );
        let signals = run_detector(&detector(EscalationVariant::MonthOverMonth), &catalog);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, Severity::High);
    }

    #[test]
    fn small_prior_month_does_not_qualify() {
        // Prior month under the $1000 floor, despite enormous growth.
        let catalog = Catalog::from_records(
            vec![
                claim("1234567890", "99213", month(2024, 1), 500.0),
                claim("1234567890", "99213", month(2024, 2), 50_000.0),
            ],
            vec![],
            vec![],
        );
        let signals = run_detector(&detector(EscalationVariant::MonthOverMonth), &catalog);
        assert!(signals.is_empty());
    }

    #[test]
    fn repeated_rows_per_month_are_aggregated_first() {
        // Two rows in the prior month sum past the floor; growth is then
        // computed against the aggregated total.
        let catalog = Catalog::from_records(
            vec![
                claim("1234567890", "99213", month(2024, 1), 600.0),
                claim("1234567890", "99214", month(2024, 1), 600.0),
                claim("1234567890", "99213", month(2024, 2), 8_000.0),
            ],
            vec![],
            vec![],
        );
        let signals = run_detector(&detector(EscalationVariant::MonthOverMonth), &catalog);
        assert_eq!(signals.len(), 1);
        let growth = signals[0]
            .evidence
            .get("growth_pct")
            .unwrap()
            .as_f64()
            .unwrap();
        // (8000 - 1200) / 1200 * 100
        assert!((growth - 566.666_666_666_666_7).abs() < 1e-6);
    }

    #[test]
    fn rolling_variant_requires_recent_enumeration() {
        let mut new_provider = provider("1234567890", EntityType::Organization);
        new_provider.enumeration_date = Some(month(2023, 6));
        let mut old_provider = provider("9876543210", EntityType::Organization);
        old_provider.enumeration_date = Some(month(2010, 1));

        let mut claims = Vec::new();
        for (provider_npi, base) in [("1234567890", 1_000.0), ("9876543210", 1_000.0)] {
            // Steep ramp: 1k, 5k, 25k, 125k.
            for (idx, factor) in [1.0, 5.0, 25.0, 125.0].iter().enumerate() {
                claims.push(claim(
                    provider_npi,
                    "99213",
                    month(2024, idx as u32 + 1),
                    base * factor,
                ));
            }
        }
        let catalog =
            Catalog::from_records(claims, vec![], vec![new_provider, old_provider]);
        let signals = run_detector(&detector(EscalationVariant::NewEntityRolling), &catalog);
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.npi, "1234567890");
        assert_eq!(signal.severity, Severity::Medium);
        assert_eq!(signal.estimated_overpayment, 156_000.0);
        assert!(signal.evidence.contains_key("peak_3_month_growth_rate_pct"));
    }
}
