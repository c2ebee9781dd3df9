//! Multiple NPIs controlled by the same authorized official.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::catalog::npi;
use crate::config::SharedOfficialSettings;
use crate::error::Result;
use crate::signals::{
    billing_totals_by_npi, sort_signals_by_metric_desc, DetectorContext, EvidenceBuilder,
    FraudSignal, Severity, SignalDetector, SignalType,
};

pub struct SharedOfficialDetector {
    settings: SharedOfficialSettings,
}

impl SharedOfficialDetector {
    pub fn new(settings: SharedOfficialSettings) -> Self {
        Self { settings }
    }
}

struct OfficialGroup {
    last_name: String,
    first_name: String,
    members: BTreeSet<String>,
}

impl SignalDetector for SharedOfficialDetector {
    fn signal_type(&self) -> SignalType {
        SignalType::SharedOfficial
    }

    fn detect(&self, ctx: &DetectorContext<'_>) -> Result<Vec<FraudSignal>> {
        // Group registry rows by the case/whitespace-normalized official name.
        let mut groups: BTreeMap<String, OfficialGroup> = BTreeMap::new();
        for provider in ctx.catalog.providers() {
            let (Some(last), Some(first)) = (
                provider.authorized_official_last.as_deref(),
                provider.authorized_official_first.as_deref(),
            ) else {
                continue;
            };
            let last_norm = last.trim().to_uppercase();
            let first_norm = first.trim().to_uppercase();
            if last_norm.is_empty() || first_norm.is_empty() {
                continue;
            }
            if !npi::is_plausible(&provider.npi) {
                continue;
            }
            let key = format!("{last_norm}|{first_norm}");
            groups
                .entry(key)
                .or_insert_with(|| OfficialGroup {
                    last_name: last.trim().to_string(),
                    first_name: first.trim().to_string(),
                    members: BTreeSet::new(),
                })
                .members
                .insert(provider.npi.clone());
        }
        groups.retain(|_, group| group.members.len() >= self.settings.min_controlled_npis);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let member_npis: HashSet<&str> = groups
            .values()
            .flat_map(|group| group.members.iter().map(String::as_str))
            .collect();
        let totals: HashMap<String, f64> = billing_totals_by_npi(ctx)?
            .into_iter()
            .filter(|(provider_npi, _)| member_npis.contains(provider_npi.as_str()))
            .collect();

        let mut signals = Vec::new();
        for group in groups.values() {
            let combined: f64 = group
                .members
                .iter()
                .map(|member| totals.get(member).copied().unwrap_or(0.0))
                .sum();
            if combined <= self.settings.combined_total_threshold {
                continue;
            }
            let severity = if combined > self.settings.combined_total_high {
                Severity::High
            } else {
                Severity::Medium
            };

            let members: Vec<&String> = group.members.iter().collect();
            let mut paid_per_npi = serde_json::Map::new();
            for member in &members {
                paid_per_npi.insert(
                    (*member).clone(),
                    totals.get(*member).copied().unwrap_or(0.0).into(),
                );
            }
            // The signal targets a representative member; the full group
            // lives in the evidence. Attribution to a single entity is not
            // meaningful, so no overpayment is estimated.
            let representative = members[0].clone();
            signals.push(FraudSignal {
                npi: representative,
                signal_type: SignalType::SharedOfficial,
                severity,
                evidence: EvidenceBuilder::new()
                    .set(
                        "authorized_official_name",
                        format!("{} {}", group.first_name, group.last_name),
                    )
                    .set("controlled_npi_count", group.members.len())
                    .set(
                        "controlled_npis",
                        members.iter().map(|m| (*m).clone()).collect::<Vec<_>>(),
                    )
                    .set("paid_per_npi", paid_per_npi)
                    .set("combined_total_paid", combined)
                    .build(),
                estimated_overpayment: 0.0,
            });
        }
        sort_signals_by_metric_desc(&mut signals, |s| {
            s.evidence
                .get("combined_total_paid")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        });
        Ok(signals)
    }
}
