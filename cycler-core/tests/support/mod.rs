#![allow(dead_code)]

//! Simulated cycler bench shared by the integration tests.
//!
//! The bench answers commands the way the firmware does: it switches mode
//! (optionally after a few samples of lag), then emits one telemetry line per
//! read with a crude linear cell model. Time only moves when a line is
//! produced, and the clock reads the same counter.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

use cycler_core::experiment::{Experiment, MonotonicClock, Progress};
use cycler_core::instrument::InstrumentLink;
use cycler_core::operation::CompletionReason;
use cycler_core::sequencer::IssuedOperation;
use cycler_core::telemetry::OperatingMode;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(u64);

impl MockInstant {
    pub fn micros(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_micros() as u64)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BenchFault;

impl std::fmt::Display for BenchFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("bench link down")
    }
}

/// Command as parsed back from the wire.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Command {
    pub mode: OperatingMode,
    pub setpoints: [f32; 3],
}

pub struct BenchState {
    pub now_us: u64,
    pub tick: Duration,
    /// Volts per amp per tick.
    pub gain: f32,
    pub voltage: f32,
    pub current: f32,
    pub reported_mode: OperatingMode,
    pub mode_lag: usize,
    pub commands: Vec<Command>,
    pub samples: usize,
    pub fail_reads_after: Option<usize>,
    pub fail_writes: bool,
    pub injected: VecDeque<String>,
    commanded: Command,
    lag_remaining: usize,
    mode_started_us: u64,
    pending: VecDeque<u8>,
    partial: String,
}

impl BenchState {
    fn new(voltage: f32) -> Self {
        Self {
            now_us: 0,
            tick: Duration::from_secs(1),
            gain: 0.0002,
            voltage,
            current: 0.0,
            reported_mode: OperatingMode::Idle,
            mode_lag: 0,
            commands: Vec::new(),
            samples: 0,
            fail_reads_after: None,
            fail_writes: false,
            injected: VecDeque::new(),
            commanded: Command {
                mode: OperatingMode::Idle,
                setpoints: [0.0; 3],
            },
            lag_remaining: 0,
            mode_started_us: 0,
            pending: VecDeque::new(),
            partial: String::new(),
        }
    }

    fn accept(&mut self, line: &str) {
        let mut fields = line.split_whitespace();
        let code: u8 = fields.next().and_then(|f| f.parse().ok()).expect("mode code");
        let mode = OperatingMode::from_code(code).expect("known mode");
        let mut setpoints = [0.0; 3];
        for slot in &mut setpoints {
            *slot = fields.next().and_then(|f| f.parse().ok()).expect("setpoint");
        }
        let command = Command { mode, setpoints };
        self.commands.push(command);
        self.commanded = command;
        self.lag_remaining = self.mode_lag;
        self.mode_started_us = self.now_us;
    }

    fn step_model(&mut self) {
        if self.lag_remaining > 0 {
            self.lag_remaining -= 1;
        } else {
            self.reported_mode = self.commanded.mode;
        }

        let [target, limit, _] = self.commanded.setpoints;
        match self.reported_mode {
            OperatingMode::Idle => self.current = 0.0,
            OperatingMode::ConstantCurrentConstantVoltage => {
                if self.voltage < target {
                    self.current = limit;
                    self.voltage = (self.voltage + limit * self.gain * 10.0).min(target);
                } else {
                    self.current *= 0.8;
                }
            }
            OperatingMode::CurrentPulse | OperatingMode::RegulatedCurrent => {
                self.current = self.commanded.setpoints[1];
                self.voltage += self.current * self.gain;
            }
        }
    }

    fn emit(&mut self) {
        let line = if let Some(line) = self.injected.pop_front() {
            line
        } else {
            self.now_us += self.tick.as_micros() as u64;
            self.samples += 1;
            self.step_model();
            let elapsed_ms = (self.now_us - self.mode_started_us) / 1_000;
            let mut line = String::new();
            write!(
                line,
                "{},{},{:.4},{:.4}\r\n",
                self.reported_mode.code(),
                elapsed_ms,
                self.voltage,
                self.current
            )
            .expect("format line");
            line
        };
        self.pending.extend(line.bytes());
    }

    pub fn commands_of(&self, mode: OperatingMode) -> usize {
        self.commands.iter().filter(|c| c.mode == mode).count()
    }
}

#[derive(Clone)]
pub struct Bench {
    state: Rc<RefCell<BenchState>>,
}

impl Bench {
    pub fn new(voltage: f32) -> Self {
        Self {
            state: Rc::new(RefCell::new(BenchState::new(voltage))),
        }
    }

    pub fn configure(&self, apply: impl FnOnce(&mut BenchState)) -> &Self {
        apply(&mut self.state.borrow_mut());
        self
    }

    pub fn state(&self) -> std::cell::Ref<'_, BenchState> {
        self.state.borrow()
    }

    pub fn clock(&self) -> BenchClock {
        BenchClock {
            state: Rc::clone(&self.state),
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.borrow().commands.clone()
    }
}

impl InstrumentLink for Bench {
    type Error = BenchFault;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BenchFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(BenchFault);
        }
        for &byte in bytes {
            if byte == b'\n' {
                let line = std::mem::take(&mut state.partial);
                state.accept(&line);
            } else {
                state.partial.push(char::from(byte));
            }
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, BenchFault> {
        let mut state = self.state.borrow_mut();
        if state.pending.is_empty() {
            if state
                .fail_reads_after
                .is_some_and(|limit| state.samples >= limit)
            {
                return Err(BenchFault);
            }
            state.emit();
        }
        state.pending.pop_front().ok_or(BenchFault)
    }
}

pub struct BenchClock {
    state: Rc<RefCell<BenchState>>,
}

impl MonotonicClock for BenchClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant::micros(self.state.borrow().now_us)
    }
}

/// Advances until the sequencer finishes, failing after `limit` iterations.
pub fn run_to_finish(
    experiment: &mut Experiment<Bench, MockInstant>,
    clock: &BenchClock,
    limit: usize,
) -> Vec<Progress<MockInstant>> {
    let mut history = Vec::new();
    while !experiment.is_finished() {
        assert!(
            history.len() < limit,
            "experiment did not finish within {limit} samples"
        );
        history.push(experiment.advance(clock).expect("advance"));
    }
    history
}

/// Every operation issued during the run, in order.
pub fn issued(history: &[Progress<MockInstant>]) -> Vec<IssuedOperation<MockInstant>> {
    history
        .iter()
        .filter_map(|progress| match progress {
            Progress::Sample(outcome) => outcome.issued,
            Progress::Skipped { .. } => None,
        })
        .collect()
}

/// Reasons of the terminal verdicts that moved the cursor, in order.
pub fn settled_reasons(history: &[Progress<MockInstant>]) -> Vec<CompletionReason> {
    history
        .iter()
        .filter_map(|progress| match progress {
            Progress::Sample(outcome) if outcome.issued.is_some() => outcome.verdict,
            _ => None,
        })
        .map(|verdict| verdict.reason)
        .collect()
}

pub fn approx(actual: f32, expected: f32) -> bool {
    (actual - expected).abs() < 1e-4
}
