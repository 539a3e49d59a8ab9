//! Peer score analysis CLI for beacon network crawler runs.
//!
//! Watches the crawler's log output live (or replays a captured log), tracks
//! every peer's connection and goodbye history, and reports signs that remote
//! peers are downscoring our node.

use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use tokio_util::sync::CancellationToken;

use peerscore::analysis::report::{self, RunReport, DEFAULT_JSON_REPORT_FILE};
use peerscore::config::{self, Config};
use peerscore::orchestrator;

const TEXT_REPORT_FILE: &str = "peer-score-report.txt";

#[derive(Parser)]
#[command(name = "peerscore")]
#[command(about = "Peer score analysis for beacon network crawler logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Number of parallel workers for replay (0 = auto-detect)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch crawler output live, from stdin or the given files
    ///
    /// A run ends at EOF, after `--duration`, or on Ctrl-C. Reports are
    /// written as soon as it ends, even while stdin is still open.
    Watch {
        /// Input file to read (repeatable, defaults to stdin)
        #[arg(short, long)]
        input: Vec<PathBuf>,

        /// Stop after this long (e.g. "2m", "90s")
        #[arg(short, long, value_parser = humantime_serde::re::humantime::parse_duration)]
        duration: Option<Duration>,

        /// Capacity of each event queue
        #[arg(long)]
        queue_capacity: Option<usize>,
    },

    /// Analyze a captured crawler log file
    Replay {
        /// Log file to replay
        file: PathBuf,
    },
}

impl Cli {
    /// Load the configuration file, then apply command-line overrides
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => Config::default(),
        };

        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Commands::Watch {
            duration,
            queue_capacity,
            ..
        } = &self.command
        {
            if duration.is_some() {
                config.test_duration = *duration;
            }
            if let Some(capacity) = queue_capacity {
                config.queue_capacity = *capacity;
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Some(path) = &cli.config {
        log::info!("Loaded configuration from {}", path.display());
    }

    let report = run_detached(run(&cli, &config))??;

    write_reports(&report, &config)?;
    report::print_summary(&report);

    if report.connection_failed {
        log::error!("{}", report.summary);
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

/// Drive `future` on a fresh runtime without waiting for leftover blocking work
///
/// A stdin read sits on a blocking thread that cancellation cannot reach, so
/// the runtime is dropped in the background instead of joined.
fn run_detached<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

async fn run(cli: &Cli, config: &Config) -> Result<RunReport> {
    match &cli.command {
        Commands::Watch { input, .. } => {
            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            log::info!("Watching crawler output...");
            orchestrator::run_watch(config, input, &cancel).await
        }
        Commands::Replay { file } => {
            if cli.threads > 0 {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(cli.threads)
                    .build_global()
                    .context("Failed to configure thread pool")?;
            }

            log::info!("Replaying {}...", file.display());
            let file = file.clone();
            tokio::task::spawn_blocking(move || orchestrator::replay_log_file(&file))
                .await
                .context("Replay task failed")?
        }
    }
}

/// Cancel the run on the first Ctrl-C
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => log::info!("Interrupted, finishing up..."),
                    Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
                }
                cancel.cancel();
            }
        }
    });
}

fn write_reports(report: &RunReport, config: &Config) -> Result<()> {
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            config.output_dir.display()
        )
    })?;

    report::write_json_report(report, &config.output_dir.join(DEFAULT_JSON_REPORT_FILE))?;

    let text_path = config.output_dir.join(TEXT_REPORT_FILE);
    fs::write(&text_path, report::generate_text_report(report))
        .with_context(|| format!("Failed to write text report to {}", text_path.display()))?;
    log::info!("Text report written to {}", text_path.display());

    Ok(())
}
