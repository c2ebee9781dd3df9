use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Name of the optional threshold-override file looked up in the data directory.
pub const SETTINGS_FILE: &str = "fraudsift.toml";

/// Fully resolved configuration for one engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory containing the three input files.
    pub data_dir: PathBuf,
    /// Path the JSON report is written to.
    pub output_path: PathBuf,
    /// Total memory budget for sort/join working sets, in bytes.
    pub memory_limit_bytes: usize,
    /// Ceiling for spill scratch space, in bytes.
    pub scratch_limit_bytes: u64,
    /// Parent directory for the scratch space (system temp dir when absent).
    pub scratch_dir: Option<PathBuf>,
    /// Detector thresholds, possibly overridden by `fraudsift.toml`.
    pub detectors: DetectorSettings,
}

impl EngineConfig {
    /// Portion of the memory budget handed to each individual sorter.
    ///
    /// The six detectors run concurrently and a detector may hold two sorted
    /// streams alive at once, so a single sorter gets a slice of the total.
    pub fn sort_budget_bytes(&self) -> usize {
        (self.memory_limit_bytes / 12).max(64 * 1024)
    }
}

/// Detector thresholds. Every field has a default matching the published
/// signal definitions; a `fraudsift.toml` in the data directory overrides them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub escalation: EscalationSettings,
    pub outlier: OutlierSettings,
    pub workforce: WorkforceSettings,
    pub shared_official: SharedOfficialSettings,
    pub geographic: GeographicSettings,
}

impl DetectorSettings {
    /// Loads settings from `fraudsift.toml` under `data_dir` when present,
    /// falling back to defaults otherwise.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        let settings: DetectorSettings = toml::from_str(&content)?;
        if !(0.0 < settings.outlier.flag_percentile && settings.outlier.flag_percentile <= 1.0) {
            return Err(EngineError::Config(format!(
                "outlier.flag_percentile must be within (0, 1], got {}",
                settings.outlier.flag_percentile
            )));
        }
        Ok(settings)
    }
}

/// Which rapid-escalation definition to run. The two definitions produce
/// different flagged sets; `MonthOverMonth` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationVariant {
    /// Unconditional month-over-month growth with a prior-month dollar floor.
    MonthOverMonth,
    /// Recently enumerated providers with a rolling 3-month average growth.
    NewEntityRolling,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    pub variant: EscalationVariant,
    /// Month-over-month variant: minimum prior-month paid for eligibility.
    pub min_prior_month_paid: f64,
    /// Month-over-month variant: growth percentage that triggers the signal.
    pub growth_threshold_pct: f64,
    /// Month-over-month variant: growth percentage that escalates to high.
    pub high_growth_pct: f64,
    /// Rolling variant: enumeration-to-first-billing window, in months.
    pub enumeration_window_months: u32,
    /// Rolling variant: number of leading billing months examined.
    pub observed_months: usize,
    /// Rolling variant: rolling-average window size.
    pub rolling_window: usize,
    /// Rolling variant: rolling-average growth percentage that triggers.
    pub rolling_growth_threshold_pct: f64,
    /// Rolling variant: rolling-average growth percentage for high severity.
    pub rolling_high_growth_pct: f64,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            variant: EscalationVariant::MonthOverMonth,
            min_prior_month_paid: 1_000.0,
            growth_threshold_pct: 500.0,
            high_growth_pct: 1_000.0,
            enumeration_window_months: 24,
            observed_months: 12,
            rolling_window: 3,
            rolling_growth_threshold_pct: 200.0,
            rolling_high_growth_pct: 500.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutlierSettings {
    /// Minimum peer-group size for percentile comparison.
    pub min_peer_group_size: usize,
    /// Flagging percentile within the peer group, as a fraction.
    pub flag_percentile: f64,
    /// Ratio-to-median above which severity escalates to high.
    pub high_ratio_to_median: f64,
}

impl Default for OutlierSettings {
    fn default() -> Self {
        Self {
            min_peer_group_size: 10,
            flag_percentile: 0.99,
            high_ratio_to_median: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkforceSettings {
    /// Implied claims-per-hour rate above which the signal fires.
    pub max_claims_per_hour: f64,
    /// Working days assumed per month.
    pub working_days_per_month: u64,
    /// Working hours assumed per day.
    pub working_hours_per_day: u64,
}

impl WorkforceSettings {
    /// Maximum plausible monthly claim volume under the configured workweek.
    pub fn plausible_monthly_claims(&self) -> f64 {
        self.max_claims_per_hour
            * (self.working_days_per_month * self.working_hours_per_day) as f64
    }
}

impl Default for WorkforceSettings {
    fn default() -> Self {
        Self {
            max_claims_per_hour: 6.0,
            working_days_per_month: 22,
            working_hours_per_day: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SharedOfficialSettings {
    /// Minimum number of distinct NPIs under one official.
    pub min_controlled_npis: usize,
    /// Combined total paid that triggers the signal.
    pub combined_total_threshold: f64,
    /// Combined total paid that escalates severity to high.
    pub combined_total_high: f64,
}

impl Default for SharedOfficialSettings {
    fn default() -> Self {
        Self {
            min_controlled_npis: 5,
            combined_total_threshold: 1_000_000.0,
            combined_total_high: 5_000_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeographicSettings {
    /// Minimum monthly claim count per code before the ratio is evaluated.
    pub min_monthly_claims: u64,
    /// Beneficiary-to-claims ratio below which the signal fires.
    pub max_beneficiary_ratio: f64,
}

impl Default for GeographicSettings {
    fn default() -> Self {
        Self {
            min_monthly_claims: 100,
            max_beneficiary_ratio: 0.1,
        }
    }
}
