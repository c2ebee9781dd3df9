//! Run orchestration: catalog load, parallel signal detection, report
//! assembly. The six detectors are mutually independent pure readers of the
//! catalog and run on blocking worker threads; results are collected into a
//! type-keyed map so assembly order is independent of completion order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::{DetectorSettings, EngineConfig};
use crate::error::{EngineError, Result};
use crate::primitives::ScratchSpace;
use crate::report::{self, Report, ReportAssembler};
use crate::signals::{
    BillingOutlierDetector, DetectorContext, ExcludedProviderDetector, FraudSignal,
    GeographicImplausibilityDetector, RapidEscalationDetector, SharedOfficialDetector,
    SignalDetector, SignalType, WorkforceImpossibilityDetector,
};

/// All six detectors, configured from settings.
pub fn detector_registry(settings: &DetectorSettings) -> Vec<Box<dyn SignalDetector>> {
    vec![
        Box::new(ExcludedProviderDetector),
        Box::new(BillingOutlierDetector::new(settings.outlier.clone())),
        Box::new(RapidEscalationDetector::new(settings.escalation.clone())),
        Box::new(WorkforceImpossibilityDetector::new(
            settings.workforce.clone(),
        )),
        Box::new(SharedOfficialDetector::new(settings.shared_official.clone())),
        Box::new(GeographicImplausibilityDetector::new(
            settings.geographic.clone(),
        )),
    ]
}

/// Runs every detector concurrently against the shared catalog. All
/// detectors draw spill space from one scratch directory with a shared
/// ceiling; the directory is removed when the last handle drops, whether
/// the run succeeds or fails.
pub async fn detect_all(
    catalog: Arc<Catalog>,
    config: &EngineConfig,
) -> Result<BTreeMap<SignalType, Vec<FraudSignal>>> {
    let scratch = Arc::new(ScratchSpace::new(
        config.scratch_dir.as_deref(),
        config.scratch_limit_bytes,
    )?);
    let sort_budget = config.sort_budget_bytes();

    let mut tasks: JoinSet<(SignalType, Result<Vec<FraudSignal>>)> = JoinSet::new();
    for detector in detector_registry(&config.detectors) {
        let catalog = Arc::clone(&catalog);
        let scratch = Arc::clone(&scratch);
        tasks.spawn_blocking(move || {
            let ctx = DetectorContext {
                catalog: &catalog,
                scratch,
                sort_budget_bytes: sort_budget,
            };
            let signal_type = detector.signal_type();
            let result = detector.detect(&ctx).map_err(|source| EngineError::Detector {
                signal_type: signal_type.as_str(),
                source: Box::new(source),
            });
            (signal_type, result)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let (signal_type, result) = joined.map_err(|err| EngineError::Task(err.to_string()))?;
        let signals = result?;
        info!(signal = %signal_type, count = signals.len(), "detector finished");
        results.insert(signal_type, signals);
    }
    Ok(results)
}

/// Full run: load, detect, assemble, write. Returns the assembled report.
pub async fn execute(config: &EngineConfig) -> Result<Report> {
    let started = Instant::now();

    info!("PHASE 1: loading data sources");
    let data_dir = config.data_dir.clone();
    let catalog = tokio::task::spawn_blocking(move || Catalog::load(&data_dir))
        .await
        .map_err(|err| EngineError::Task(err.to_string()))??;
    let catalog = Arc::new(catalog);

    info!("PHASE 2: detecting fraud signals");
    let signals_by_type = detect_all(Arc::clone(&catalog), config).await?;

    info!("PHASE 3: generating report");
    let report = ReportAssembler::new(&catalog).assemble(&signals_by_type);
    report::write_report(&report, &config.output_path)?;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        providers_scanned = report.total_providers_scanned,
        providers_flagged = report.total_providers_flagged,
        "run complete"
    );
    Ok(report)
}
