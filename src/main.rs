use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};

use fraudsift::config::{DetectorSettings, EngineConfig};
use fraudsift::engine;
use fraudsift::logging;

#[derive(Parser)]
#[command(name = "fraudsift")]
#[command(about = "Medicaid provider fraud signal detection engine")]
#[command(version)]
struct Cli {
    /// Directory containing input data files
    #[arg(long, short = 'd', default_value = "./data")]
    data_dir: PathBuf,

    /// Output JSON report path
    #[arg(long, short = 'o', default_value = "fraud_signals.json")]
    output: PathBuf,

    /// Memory budget for joins and sorts, in megabytes
    #[arg(long, default_value_t = 1024)]
    memory_limit: usize,

    /// Ceiling for spill scratch space, in megabytes
    #[arg(long, default_value_t = 8192)]
    scratch_limit: u64,

    /// Directory for spill scratch files (system temp dir by default)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if !cli.data_dir.exists() {
        bail!(
            "data directory not found: {} (download the input datasets first)",
            cli.data_dir.display()
        );
    }

    let detectors = DetectorSettings::load(&cli.data_dir)
        .context("failed reading detector settings")?;
    let config = EngineConfig {
        data_dir: cli.data_dir.clone(),
        output_path: cli.output.clone(),
        memory_limit_bytes: cli.memory_limit.saturating_mul(1024 * 1024),
        scratch_limit_bytes: cli.scratch_limit.saturating_mul(1024 * 1024),
        scratch_dir: cli.scratch_dir.clone(),
        detectors,
    };

    info!("Medicaid provider fraud signal detection engine");
    info!(data_dir = %config.data_dir.display(), output = %config.output_path.display(), memory_limit_mb = cli.memory_limit, "starting run");

    let report = engine::execute(&config)
        .await
        .context("detection run failed")?;

    println!("\n📊 Detection results:");
    println!("   Providers scanned: {}", report.total_providers_scanned);
    println!("   Providers flagged: {}", report.total_providers_flagged);
    println!("   Signal counts:");
    for (signal_type, count) in &report.signal_counts {
        println!("     {signal_type}: {count}");
    }
    println!("   Report written to: {}", config.output_path.display());
    Ok(())
}
