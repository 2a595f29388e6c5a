//! `kb-harvest`: export a project's knowledge documents into a single archive.

mod commands;
mod source;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use kb_engine::{load_settings_or_default, HarvestSettings};
use kb_logging::log::LevelFilter;
use kb_logging::{LogDestination, DEFAULT_LOG_FILE};

use crate::source::PageSource;

#[derive(Parser)]
#[command(name = "kb-harvest")]
#[command(about = "Harvest knowledge-base documents into a portable archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (RON); missing file means built-in defaults
    #[arg(short, long, global = true, default_value = "harvester.ron")]
    config: PathBuf,

    /// Directory archives are written to
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(flatten)]
    timings: TimingOverrides,

    /// Also log to this file
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = DEFAULT_LOG_FILE)]
    log_file: Option<PathBuf>,

    /// Log to the file only, keeping the terminal quiet
    #[arg(long, global = true, requires = "log_file")]
    log_only: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct TimingOverrides {
    /// Wait after opening a document overlay, in milliseconds
    #[arg(long, global = true)]
    open_ms: Option<u64>,

    /// Wait after closing an overlay, in milliseconds
    #[arg(long, global = true)]
    close_ms: Option<u64>,

    /// Wait before each title probe, in milliseconds
    #[arg(long, global = true)]
    probe_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one export batch and write the archive
    Export {
        #[command(flatten)]
        source: PageSource,

        /// Package in-process instead of through the background worker
        #[arg(long)]
        no_background: bool,
    },

    /// Answer host requests read as JSON lines on stdin.
    /// Stdout carries only responses, so logs always go to a file.
    Listen {
        #[command(flatten)]
        source: PageSource,

        #[arg(long)]
        no_background: bool,
    },

    /// Watch the page and report when the export trigger should appear
    Watch {
        #[command(flatten)]
        source: PageSource,

        /// Page sampling interval in milliseconds
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,

        /// Stop after this many samples
        #[arg(long)]
        max_polls: Option<u64>,

        /// Run an export the first time the page is detected
        #[arg(long)]
        auto_export: bool,
    },
}

fn settings(cli: &Cli) -> HarvestSettings {
    let mut settings = load_settings_or_default(&cli.config);
    if let Some(output) = &cli.output {
        settings.output_dir = output.clone();
    }
    let timings = &mut settings.timings;
    if let Some(ms) = cli.timings.open_ms {
        timings.open_ms = ms;
    }
    if let Some(ms) = cli.timings.close_ms {
        timings.close_ms = ms;
    }
    if let Some(ms) = cli.timings.probe_ms {
        timings.probe_ms = ms;
    }
    settings
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    kb_logging::initialize(log_destination(cli), level);
}

/// Terminal logs share stdout with `listen` responses, so that command logs to a file only.
fn log_destination(cli: &Cli) -> LogDestination {
    let stdout_reserved = matches!(cli.command, Commands::Listen { .. });
    match &cli.log_file {
        Some(path) if cli.log_only || stdout_reserved => LogDestination::File(path.clone()),
        Some(path) => LogDestination::Both(path.clone()),
        None if stdout_reserved => LogDestination::File(PathBuf::from(DEFAULT_LOG_FILE)),
        None => LogDestination::Terminal,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let settings = settings(&cli);

    match cli.command {
        Commands::Export {
            source,
            no_background,
        } => commands::export(settings, &source, no_background).await,
        Commands::Listen {
            source,
            no_background,
        } => commands::listen(settings, &source, no_background).await,
        Commands::Watch {
            source,
            poll_ms,
            max_polls,
            auto_export,
        } => {
            let watch = commands::WatchOptions {
                poll_ms,
                max_polls,
                auto_export,
            };
            commands::watch(settings, &source, watch).await
        }
    }
}
