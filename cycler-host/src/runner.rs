//! Control loop around an [`Experiment`].
//!
//! Owns the side effects the core leaves to its caller: the CSV log, console
//! logging and operator abort.

use std::io::{self, BufRead, ErrorKind, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cycler_core::experiment::{Experiment, ExperimentError, MonotonicClock, Progress};
use cycler_core::instrument::InstrumentLink;
use cycler_core::sequencer::{ProtocolVariables, SampleOutcome};
use cycler_core::sequences::{ProtocolKind, hppc, incremental_ocv};
use tracing::{debug, error, info, warn};

use crate::csv_log::LogWriter;
use crate::error::RunError;

/// Wall-clock time source sampled after each line arrives.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostClock;

impl MonotonicClock for HostClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// The program reached its finish step.
    Finished,
    /// The operator stopped the run; idle was commanded.
    Aborted,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunSummary {
    pub protocol: ProtocolKind,
    pub outcome: RunOutcome,
    pub operations: usize,
    pub records: usize,
    pub variables: ProtocolVariables,
}

/// Drives `experiment` until it finishes, fails or `abort` is raised.
pub fn run<L, C, W>(
    experiment: &mut Experiment<L, Instant>,
    clock: &C,
    log: &mut LogWriter<W>,
    abort: &AtomicBool,
) -> Result<RunSummary, RunError>
where
    L: InstrumentLink<Error = io::Error>,
    C: MonotonicClock<Instant = Instant>,
    W: Write,
{
    let protocol = experiment.sequencer().program().kind();
    info!(%protocol, steps = experiment.sequencer().program().len(), "starting run");

    while !experiment.is_finished() {
        if abort.load(Ordering::Relaxed) {
            warn!(step = experiment.sequencer().cursor(), "operator abort, commanding idle");
            experiment.abort().map_err(RunError::ChannelFault)?;
            return Ok(summarize(experiment, log, RunOutcome::Aborted));
        }

        let progress = match experiment.advance(clock) {
            Ok(progress) => progress,
            Err(ExperimentError::ChannelFault(err))
                if err.kind() == ErrorKind::Interrupted && abort.load(Ordering::Relaxed) =>
            {
                warn!(step = experiment.sequencer().cursor(), "operator abort while waiting for telemetry");
                return Ok(summarize(experiment, log, RunOutcome::Aborted));
            }
            Err(err) => {
                error!(step = experiment.sequencer().cursor(), %err, "run stopped, idle attempted");
                return Err(err.into());
            }
        };

        let line = experiment.session().last_line();
        if !line.is_empty() {
            log.record(progress.step(), line)?;
        }

        match progress {
            Progress::Skipped { step, error } => {
                warn!(step, %error, line, "skipping malformed telemetry");
            }
            Progress::Sample(outcome) => report(experiment, &outcome),
        }
    }

    let summary = summarize(experiment, log, RunOutcome::Finished);
    info!(operations = summary.operations, records = summary.records, "run finished");
    report_counters(&summary);
    Ok(summary)
}

fn report<L>(experiment: &Experiment<L, Instant>, outcome: &SampleOutcome<Instant>)
where
    L: InstrumentLink,
{
    if let Some(sample) = experiment.session().last_sample() {
        debug!(
            step = outcome.step,
            mode = %sample.mode,
            elapsed_ms = sample.elapsed_ms,
            voltage = sample.voltage,
            current = sample.current,
            "sample"
        );
    }

    if let Some(verdict) = outcome.verdict
        && verdict.complete
    {
        info!(step = outcome.step, phase = %outcome.phase, reason = %verdict.reason, "operation complete");
    }

    if let Some(issued) = &outcome.issued {
        let kind = issued.spec.kind;
        let timeout = issued.spec.deadline - issued.spec.issued_at;
        info!(
            step = issued.step,
            phase = %issued.phase,
            mode = %kind.mode(),
            setpoints = ?kind.setpoints(),
            timeout_s = timeout.as_secs(),
            upper = issued.spec.limits.upper,
            lower = issued.spec.limits.lower,
            "issuing operation"
        );
    }
}

fn summarize<L, W>(
    experiment: &Experiment<L, Instant>,
    log: &LogWriter<W>,
    outcome: RunOutcome,
) -> RunSummary
where
    L: InstrumentLink,
    W: Write,
{
    let sequencer = experiment.sequencer();
    RunSummary {
        protocol: sequencer.program().kind(),
        outcome,
        operations: sequencer.issued_count(),
        records: log.records(),
        variables: *sequencer.variables(),
    }
}

fn report_counters(summary: &RunSummary) {
    let variables = &summary.variables;
    match summary.protocol {
        ProtocolKind::Hppc => {
            info!(cycles = variables.counter(hppc::CYCLES), "pulse cycles");
        }
        ProtocolKind::IncrementalOcv => {
            info!(
                discharge_steps = variables.counter(incremental_ocv::DISCHARGE_STEPS),
                charge_steps = variables.counter(incremental_ocv::CHARGE_STEPS),
                "increments"
            );
        }
        ProtocolKind::StaticCapacity | ProtocolKind::PseudoOcv => {}
    }
}

/// Returns true for the console words that stop a run.
#[must_use]
pub fn should_terminate(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("stop")
        || input.eq_ignore_ascii_case("exit")
        || input.eq_ignore_ascii_case("quit")
}

/// Watches `input` for a stop word and raises `flag`. Ends at end of input.
pub fn spawn_abort_listener<R>(input: R, flag: Arc<AtomicBool>) -> io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("abort-listener".to_owned())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                if should_terminate(&line) {
                    flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        })
}
