//! Static legal-relevance lookups keyed by signal type.
//!
//! This is a formatting collaborator over the engine's structured output: a
//! claim-type description, a statute reference, and short next-step
//! suggestions. Nothing here feeds back into detection.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::catalog::ProviderRecord;
use crate::signals::{FraudSignal, SignalType};

#[derive(Debug, Clone, Serialize)]
pub struct FcaRelevance {
    pub claim_type: String,
    pub statute_reference: String,
    pub suggested_next_steps: Vec<String>,
}

static STATUTES: Lazy<HashMap<SignalType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (SignalType::ExcludedProvider, "31 U.S.C. § 3729(a)(1)(A)"),
        (SignalType::BillingOutlier, "31 U.S.C. § 3729(a)(1)(A)"),
        (SignalType::RapidEscalation, "31 U.S.C. § 3729(a)(1)(A)"),
        (SignalType::WorkforceImpossibility, "31 U.S.C. § 3729(a)(1)(B)"),
        (SignalType::SharedOfficial, "31 U.S.C. § 3729(a)(1)(C)"),
        (SignalType::GeographicImplausibility, "31 U.S.C. § 3729(a)(1)(G)"),
    ])
});

static CLAIM_TYPES: Lazy<HashMap<SignalType, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            SignalType::ExcludedProvider,
            "False claims submitted by excluded provider - provider was barred from federal healthcare programs but continued billing",
        ),
        (
            SignalType::BillingOutlier,
            "Potential overbilling - provider billing volume significantly exceeds peer group norms",
        ),
        (
            SignalType::RapidEscalation,
            "Potential bust-out scheme - newly formed entity showed rapid, unsustainable billing escalation",
        ),
        (
            SignalType::WorkforceImpossibility,
            "False records - claimed service volume is physically impossible given workforce constraints",
        ),
        (
            SignalType::SharedOfficial,
            "Conspiracy - coordinated billing through multiple entities controlled by same individual",
        ),
        (
            SignalType::GeographicImplausibility,
            "Reverse false claims - repeated billing on same patients suggests phantom services",
        ),
    ])
});

/// Builds the legal-relevance block for a flagged provider from its primary
/// signal.
pub fn relevance_for(primary: &FraudSignal, provider: Option<&ProviderRecord>) -> FcaRelevance {
    FcaRelevance {
        claim_type: CLAIM_TYPES
            .get(&primary.signal_type)
            .copied()
            .unwrap_or("Potential false claims violation")
            .to_string(),
        statute_reference: STATUTES
            .get(&primary.signal_type)
            .copied()
            .unwrap_or("31 U.S.C. § 3729(a)(1)(A)")
            .to_string(),
        suggested_next_steps: suggested_next_steps(primary, provider),
    }
}

fn evidence_str<'a>(signal: &'a FraudSignal, key: &str, fallback: &'a str) -> &'a str {
    signal
        .evidence
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
}

/// Short investigation suggestions per signal type. At least 2, capped at 3.
fn suggested_next_steps(
    signal: &FraudSignal,
    provider: Option<&ProviderRecord>,
) -> Vec<String> {
    let npi = &signal.npi;
    let mut steps = match signal.signal_type {
        SignalType::ExcludedProvider => {
            let exclusion_date = evidence_str(signal, "exclusion_date", "the exclusion date");
            let mut steps = vec![
                format!("Verify exclusion status of NPI {npi} in the OIG exclusion database"),
                format!("Request detailed claims records for {npi} from {exclusion_date} forward"),
                format!("Calculate total Medicaid payments to {npi} during the exclusion period"),
            ];
            if let Some(state) = provider.and_then(|p| p.state.as_deref()) {
                steps.push(format!("Contact the {state} Medicaid Fraud Control Unit"));
            }
            steps
        }
        SignalType::BillingOutlier => {
            let taxonomy = evidence_str(signal, "taxonomy_code", "unknown");
            let state = evidence_str(signal, "state", "unknown");
            vec![
                format!("Audit claims for NPI {npi} against peer providers in {taxonomy}/{state}"),
                "Request medical records supporting high-volume claims".to_string(),
                "Compare service patterns to specialty norms".to_string(),
                "Interview beneficiaries to verify services were rendered".to_string(),
            ]
        }
        SignalType::RapidEscalation => {
            let enumerated = evidence_str(signal, "enumeration_date", "unknown");
            vec![
                format!("Investigate ownership/management of entity NPI {npi} (enumerated {enumerated})"),
                "Review business formation documents and license applications".to_string(),
                "Analyze referral patterns for evidence of kickback arrangements".to_string(),
                "Compare growth trajectory to legitimate new practices".to_string(),
            ]
        }
        SignalType::WorkforceImpossibility => {
            let rate = signal
                .evidence
                .get("implied_claims_per_hour")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            vec![
                format!("Request employment records and staffing levels for NPI {npi}"),
                format!("Verify claimed {rate:.1} claims/hour is humanly possible"),
                "Audit time-of-service documentation for sample claims".to_string(),
                "Interview staff and patients regarding actual service delivery".to_string(),
            ]
        }
        SignalType::SharedOfficial => {
            let official = evidence_str(signal, "authorized_official_name", "unknown");
            let count = signal
                .evidence
                .get("controlled_npi_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            vec![
                format!("Investigate business relationships among {count} entities controlled by {official}"),
                "Review corporate formation documents for common ownership".to_string(),
                "Analyze billing patterns for coordinated fraud indicators".to_string(),
                "Examine referral patterns between controlled entities".to_string(),
            ]
        }
        SignalType::GeographicImplausibility => {
            let state = evidence_str(signal, "state", "unknown");
            let codes = signal
                .evidence
                .get("flagged_hcpcs_codes")
                .and_then(|v| v.as_array())
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str())
                        .take(5)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            vec![
                format!("Audit home health claims for NPI {npi} in {state}"),
                "Verify beneficiary addresses and ability to receive home services".to_string(),
                format!("Request documentation for HCPCS codes: {codes}"),
                "Interview beneficiaries regarding services actually received".to_string(),
            ]
        }
    };
    steps.truncate(3);
    steps
}
