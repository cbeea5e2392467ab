use std::io::{self, BufReader};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;
use cycler_core::experiment::Experiment;
use cycler_host::config::Cli;
use cycler_host::csv_log::LogWriter;
use cycler_host::error::RunError;
use cycler_host::link::{SerialLink, open_port};
use cycler_host::runner::{self, HostClock, RunOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let program = cli
        .protocol
        .program()
        .context("invalid protocol parameters")?;
    let log_path = cli.log_path();
    info!(
        protocol = %program.kind(),
        port = %cli.port,
        baud = cli.baud,
        log = %log_path.display(),
        "configuration loaded"
    );

    let port = open_port(&cli.port, cli.baud)
        .with_context(|| format!("failed to open serial port {}", cli.port))?;
    let mut log = LogWriter::append(&log_path)
        .with_context(|| format!("failed to open log {}", log_path.display()))?;

    let abort = Arc::new(AtomicBool::new(false));
    runner::spawn_abort_listener(BufReader::new(io::stdin()), Arc::clone(&abort))
        .context("failed to start console listener")?;
    info!("type `stop` to abort the run");

    let link = SerialLink::new(port).with_abort(Arc::clone(&abort));
    let mut experiment = Experiment::new(link, program).map_err(RunError::Program)?;
    let summary = runner::run(&mut experiment, &HostClock, &mut log, &abort)?;

    if summary.outcome == RunOutcome::Aborted {
        warn!(operations = summary.operations, "run aborted");
    }
    Ok(())
}
