//! caf - Calibration Framework CLI
//!
//! Drives a plan of calibrations over a requested IoV coverage:
//!
//! - `run`: execute every calibration in a plan file, locally or on LSF
//! - `status`: summarise a previous run's output directory

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use caf_core::{Backend, Caf, CafConfig, LocalBackend, LsfBackend};
use caf_domain::Iov;
use caf_state::{CalibrationLedger, CalibrationStatus, FsLedger};

mod plan;

#[derive(Parser)]
#[command(name = "caf")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Calibration run orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every calibration in a plan file
    Run {
        /// Calibration plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Output directory for markers, payloads and job logs
        #[arg(short, long, default_value = "caf_output")]
        output_dir: PathBuf,

        /// Requested coverage as exp.run:exp.run (-1 for open-ended)
        #[arg(long, default_value = "0.0:-1.-1")]
        iov: String,

        /// Where collector jobs run
        #[arg(long, value_enum, default_value_t = BackendKind::Local)]
        backend: BackendKind,

        /// Concurrent collector processes (local backend)
        #[arg(long, default_value_t = 4)]
        max_processes: usize,

        /// Batch queue name (lsf backend)
        #[arg(long, default_value = "s")]
        queue: String,

        /// Seconds between backend polls
        #[arg(long, default_value_t = 10)]
        heartbeat: u64,

        /// Seconds before a calibration's collection phase times out
        #[arg(long, default_value_t = 3600)]
        collect_timeout: u64,
    },

    /// Summarise the calibrations recorded in an output directory
    Status {
        /// Output directory of a previous run
        #[arg(short, long, default_value = "caf_output")]
        output_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Child processes on this machine
    Local,
    /// LSF batch system via bsub/bjobs
    Lsf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    caf_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            plan,
            output_dir,
            iov,
            backend,
            max_processes,
            queue,
            heartbeat,
            collect_timeout,
        } => {
            cmd_run(
                &plan,
                &output_dir,
                &iov,
                backend,
                max_processes,
                &queue,
                heartbeat,
                collect_timeout,
            )
            .await
        }
        Commands::Status { output_dir } => cmd_status(&output_dir).await,
    }
}

/// Parse `exp.run:exp.run`; the high pair may use -1 for open-ended.
fn parse_iov(text: &str) -> Result<Iov> {
    let (low, high) = text
        .split_once(':')
        .with_context(|| format!("Expected exp.run:exp.run, got {text:?}"))?;
    let (exp_low, run_low) = parse_pair(low)?;
    let (exp_high, run_high) = parse_pair(high)?;
    if exp_low < 0 || run_low < 0 {
        anyhow::bail!("IoV low bound must be concrete, got {text:?}");
    }
    Iov::new(exp_low as u32, run_low as u32, exp_high, run_high)
        .with_context(|| format!("Invalid IoV {text:?}"))
}

fn parse_pair(text: &str) -> Result<(i64, i64)> {
    let (exp, run) = text
        .split_once('.')
        .with_context(|| format!("Expected exp.run, got {text:?}"))?;
    Ok((
        exp.parse().with_context(|| format!("Bad experiment number {exp:?}"))?,
        run.parse().with_context(|| format!("Bad run number {run:?}"))?,
    ))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    plan_path: &PathBuf,
    output_dir: &PathBuf,
    iov_text: &str,
    backend_kind: BackendKind,
    max_processes: usize,
    queue: &str,
    heartbeat: u64,
    collect_timeout: u64,
) -> Result<()> {
    let coverage = parse_iov(iov_text)?;
    let plan = plan::load(plan_path)?;

    let backend: Arc<dyn Backend> = match backend_kind {
        BackendKind::Local => Arc::new(LocalBackend::new(max_processes)),
        BackendKind::Lsf => Arc::new(LsfBackend::new(queue)),
    };
    let ledger = Arc::new(FsLedger::new(output_dir));
    let mut config = CafConfig::new(output_dir);
    config.heartbeat = Duration::from_secs(heartbeat);
    config.collect_timeout = Duration::from_secs(collect_timeout);

    let mut caf = Caf::new(backend, ledger, config);
    for calibration in plan::build_calibrations(plan, output_dir)? {
        caf.add_calibration(calibration)?;
    }

    let report = caf.run(coverage).await?;

    println!("Calibration run over {coverage}:");
    for outcome in &report.calibrations {
        let mark = match outcome.status {
            CalibrationStatus::Completed => "✓",
            _ => "✗",
        };
        println!("  {} {} ({:?})", mark, outcome.name, outcome.status);
        if let Some(dep) = &outcome.skipped_due_to {
            println!("      skipped: dependency '{dep}' did not complete");
        }
        for algorithm in &outcome.algorithms {
            println!(
                "      {}: {} payloads, {} failed ranges{}",
                algorithm.name,
                algorithm.committed.len(),
                algorithm.failures.len(),
                if algorithm.done { "" } else { " (not done)" }
            );
        }
    }

    if report.all_complete() {
        println!("\nAll calibrations completed.");
        Ok(())
    } else {
        anyhow::bail!("Some calibrations did not complete")
    }
}

async fn cmd_status(output_dir: &PathBuf) -> Result<()> {
    let ledger = FsLedger::new(output_dir);
    let mut entries = std::fs::read_dir(output_dir)
        .with_context(|| format!("Failed to read output directory {:?}", output_dir))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    entries.sort();

    if entries.is_empty() {
        println!("No calibrations found in {:?}", output_dir);
        return Ok(());
    }

    for name in entries {
        match ledger.read_marker(&name).await {
            Ok(marker) => {
                let payloads = ledger.list_payloads(&name).await?.len();
                println!(
                    "{} {:?} (run {}, {} payloads)",
                    marker.name, marker.status, marker.run_id, payloads
                );
                for algorithm in &marker.algorithms {
                    println!(
                        "    {}: {} payloads, {} failed ranges",
                        algorithm.name,
                        algorithm.committed.len(),
                        algorithm.failures.len()
                    );
                }
            }
            Err(e) => println!("{name} (no marker: {e})"),
        }
    }
    Ok(())
}
