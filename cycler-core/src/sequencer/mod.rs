//! Step program interpreter.
//!
//! The sequencer is driven one telemetry sample at a time. The first sample
//! issues step 0; afterwards only a freshly settled verdict moves the cursor,
//! and it moves exactly once per settled operation. Threshold watches are
//! evaluated on every sample regardless of the active step.

use core::ops::Add;
use core::time::Duration;

use crate::operation::{ActiveOperation, CompletionVerdict, OperationSpec, Poll, VoltageWindow};
use crate::sequences::{
    CounterId, FlagId, Guard, MAX_COUNTERS, MAX_FLAGS, Phase, ProgramError, Step, StepProgram,
};
use crate::telemetry::TelemetrySample;

/// Counters and flags read by branch guards.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProtocolVariables {
    counters: [u16; MAX_COUNTERS],
    flags: [bool; MAX_FLAGS],
}

impl ProtocolVariables {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: [0; MAX_COUNTERS],
            flags: [false; MAX_FLAGS],
        }
    }

    #[must_use]
    pub fn counter(&self, id: CounterId) -> u16 {
        self.counters.get(id.as_index()).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn flag(&self, id: FlagId) -> bool {
        self.flags.get(id.as_index()).copied().unwrap_or(false)
    }

    fn tally(&mut self, id: CounterId) {
        if let Some(count) = self.counters.get_mut(id.as_index()) {
            *count = count.saturating_add(1);
        }
    }

    fn latch(&mut self, id: FlagId) {
        if let Some(flag) = self.flags.get_mut(id.as_index()) {
            *flag = true;
        }
    }

    /// Evaluates a branch guard against the current values.
    #[must_use]
    pub fn holds(&self, guard: &Guard) -> bool {
        match *guard {
            Guard::Always => true,
            Guard::Flag(flag) => self.flag(flag),
            Guard::NotFlag(flag) => !self.flag(flag),
            Guard::CounterBelow { counter, limit } => self.counter(counter) < limit,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequencerState {
    /// Waiting for the first sample.
    NotStarted,
    Running,
    /// The finish step has been issued.
    Finished,
}

/// Operation issued while handling a sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IssuedOperation<I> {
    pub step: usize,
    pub phase: Phase,
    pub spec: OperationSpec<I>,
}

/// Everything the sequencer decided about one sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SampleOutcome<I> {
    /// Cursor when the sample arrived, used as the log step index.
    pub step: usize,
    pub phase: Phase,
    /// Verdict for the operation that was active when the sample arrived.
    pub verdict: Option<CompletionVerdict>,
    /// Operation to send to the instrument, if the cursor moved.
    pub issued: Option<IssuedOperation<I>>,
    pub finished: bool,
}

pub struct Sequencer<I> {
    program: StepProgram,
    cursor: usize,
    variables: ProtocolVariables,
    active: Option<ActiveOperation<I>>,
    limits: VoltageWindow,
    state: SequencerState,
    issued: usize,
}

impl<I> Sequencer<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Validates the program and parks the cursor on step 0.
    pub fn new(program: StepProgram) -> Result<Self, ProgramError> {
        program.validate()?;
        Ok(Self {
            program,
            cursor: 0,
            variables: ProtocolVariables::new(),
            active: None,
            limits: VoltageWindow::unbounded(),
            state: SequencerState::NotStarted,
            issued: 0,
        })
    }

    /// Processes one sample observed at `now`.
    pub fn on_sample(&mut self, sample: &TelemetrySample, now: I) -> SampleOutcome<I> {
        let step = self.cursor;
        let phase = self.phase();
        self.latch_watches(sample);

        let mut outcome = SampleOutcome {
            step,
            phase,
            verdict: None,
            issued: None,
            finished: false,
        };

        match self.state {
            SequencerState::NotStarted => {
                self.state = SequencerState::Running;
                outcome.issued = Some(self.enter(0, now));
            }
            SequencerState::Running => {
                if let Some(active) = self.active.as_mut() {
                    let poll = active.poll(sample, now);
                    outcome.verdict = Some(poll.verdict());
                    if let Poll::Settled(_) = poll {
                        let next = self.settle();
                        outcome.issued = Some(self.enter(next, now));
                    }
                }
            }
            SequencerState::Finished => {}
        }

        outcome.finished = self.is_finished();
        outcome
    }

    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.program
            .step(self.cursor)
            .map_or(Phase::Finished, |step| step.phase)
    }

    #[must_use]
    pub const fn state(&self) -> SequencerState {
        self.state
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, SequencerState::Finished)
    }

    #[must_use]
    pub const fn variables(&self) -> &ProtocolVariables {
        &self.variables
    }

    #[must_use]
    pub const fn active(&self) -> Option<&ActiveOperation<I>> {
        self.active.as_ref()
    }

    /// Voltage window currently in force.
    #[must_use]
    pub const fn limits(&self) -> VoltageWindow {
        self.limits
    }

    /// Number of operations issued so far, including the final idle.
    #[must_use]
    pub const fn issued_count(&self) -> usize {
        self.issued
    }

    #[must_use]
    pub const fn program(&self) -> &StepProgram {
        &self.program
    }

    fn latch_watches(&mut self, sample: &TelemetrySample) {
        for watch in self.program.watches() {
            let armed = watch.armed_by.is_none_or(|flag| self.variables.flag(flag));
            if armed && watch.threshold.crossed(sample.voltage) {
                self.variables.latch(watch.flag);
            }
        }
    }

    /// Applies the settled step's tally and picks the next cursor.
    fn settle(&mut self) -> usize {
        let Some(step) = self.program.step(self.cursor) else {
            return self.cursor;
        };
        if let Some(counter) = step.tally {
            self.variables.tally(counter);
        }

        step.branches
            .iter()
            .find(|branch| self.variables.holds(&branch.guard))
            .map_or(self.cursor + 1, |branch| branch.target)
    }

    fn enter(&mut self, index: usize, now: I) -> IssuedOperation<I> {
        let (phase, request, finish) = match self.program.step(index) {
            Some(step) => (step.phase, step.operation(), step.is_finish()),
            None => (Phase::Finished, Step::finish().operation(), true),
        };

        if let Some(limits) = request.limits {
            self.limits = limits;
        }
        let spec = request.issue(now, self.limits);

        self.cursor = index;
        self.active = Some(ActiveOperation::new(spec));
        self.issued += 1;
        if finish {
            self.state = SequencerState::Finished;
        }

        IssuedOperation { step: index, phase, spec }
    }
}
