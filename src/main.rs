use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::error;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use webtrail::export::read_export;
use webtrail::replay::run_replay;
use webtrail::util::config::AppConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a recorded session through the capture pipeline and export
    /// the resulting event log
    Replay {
        /// Recorded session JSON file
        input: PathBuf,
        /// Export directory override
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Summarize an exported event log
    Inspect {
        /// Export file produced by a session
        file: PathBuf,
    },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

fn ensure_workspace_dir(workspace_dir: &PathBuf) -> Result<()> {
    if !workspace_dir.exists() {
        std::fs::create_dir_all(workspace_dir).context("Failed to create workspace directory")?;
    }
    Ok(())
}

fn replay_command(config: AppConfig, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let mut config = config;
    if let Some(output) = output {
        config.export_dir = output;
    }

    let summary = run_replay(&config, &input)?;
    println!(
        "replayed {:?}: {} records, {} navigations",
        input, summary.records, summary.navigations
    );
    println!("export: {:?}", summary.export_path);
    Ok(())
}

fn inspect_command(file: PathBuf) -> Result<()> {
    let events = read_export(&file)?;

    println!("{:?}: {} records", file, events.len());
    if events.is_empty() {
        return Ok(());
    }

    let first = events[0].timestamp;
    let last = events[events.len() - 1].timestamp;
    println!(
        "span: {} .. {} ({} ms)",
        first.format("%Y-%m-%d %H:%M:%S%.3f"),
        last.format("%Y-%m-%d %H:%M:%S%.3f"),
        (last - first).num_milliseconds()
    );

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for event in &events {
        *by_kind.entry(event.event_type()).or_insert(0) += 1;
    }
    for (kind, count) in by_kind {
        println!("  {kind:<22} {count}");
    }

    let unattributed = events.iter().filter(|e| e.tab_id.is_none()).count();
    if unattributed > 0 {
        println!("  ({unattributed} records without a resolved tab id)");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = ensure_workspace_dir(&config.workspace_dir) {
        error!("Failed to create workspace directory: {}", e);
        process::exit(1);
    }

    let result = match cli.command {
        Commands::Replay { input, output } => replay_command(config, input, output),
        Commands::Inspect { file } => inspect_command(file),
    };

    if let Err(e) = result {
        error!("Error: {}", e);
        process::exit(1);
    }
}
