//! Experiment driver tying the instrument session to the sequencer.
//!
//! Each call to [`Experiment::advance`] performs one iteration of the control
//! loop: block for a line, decode it, let the sequencer judge it, and send any
//! operation the sequencer issued. Malformed lines are skipped without
//! touching sequencer state; channel faults end the run after one idle attempt.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::instrument::{InstrumentLink, InstrumentSession, SessionError};
use crate::sequencer::{SampleOutcome, Sequencer};
use crate::sequences::{ProgramError, StepProgram};
use crate::telemetry::FrameError;

/// Monotonic time source sampled after each telemetry line arrives.
pub trait MonotonicClock {
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    fn now(&self) -> Self::Instant;
}

/// Result of one loop iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Progress<I> {
    Sample(SampleOutcome<I>),
    /// The line could not be decoded; nothing else changed.
    Skipped { step: usize, error: FrameError },
}

impl<I> Progress<I> {
    /// Step index to record alongside the raw line.
    #[must_use]
    pub const fn step(&self) -> usize {
        match self {
            Progress::Sample(outcome) => outcome.step,
            Progress::Skipped { step, .. } => *step,
        }
    }
}

/// Fatal experiment failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExperimentError<E> {
    /// The instrument channel failed; one idle command was attempted.
    ChannelFault(E),
    /// An issued operation could not be encoded.
    Command(FrameError),
    /// The session was closed before the run finished.
    Closed,
}

impl<E: fmt::Display> fmt::Display for ExperimentError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentError::ChannelFault(err) => write!(f, "instrument channel fault: {err}"),
            ExperimentError::Command(err) => write!(f, "could not encode command: {err}"),
            ExperimentError::Closed => f.write_str("instrument session closed"),
        }
    }
}

pub struct Experiment<L, I>
where
    L: InstrumentLink,
{
    session: InstrumentSession<L>,
    sequencer: Sequencer<I>,
}

impl<L, I> Experiment<L, I>
where
    L: InstrumentLink,
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Validates the program; nothing is sent until the first sample arrives.
    pub fn new(link: L, program: StepProgram) -> Result<Self, ProgramError> {
        let sequencer = Sequencer::new(program)?;
        Ok(Self {
            session: InstrumentSession::new(link),
            sequencer,
        })
    }

    /// Runs one read/evaluate/issue iteration.
    pub fn advance<C>(&mut self, clock: &C) -> Result<Progress<I>, ExperimentError<L::Error>>
    where
        C: MonotonicClock<Instant = I>,
    {
        let step = self.sequencer.cursor();
        let sample = match self.session.next_sample() {
            Ok(sample) => sample,
            Err(SessionError::Malformed(error)) => return Ok(Progress::Skipped { step, error }),
            Err(err) => return Err(self.fault(err)),
        };

        let outcome = self.sequencer.on_sample(&sample, clock.now());
        if let Some(issued) = &outcome.issued
            && let Err(err) = self.session.send_operation(&issued.spec.kind)
        {
            return Err(self.fault(err));
        }

        Ok(Progress::Sample(outcome))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.sequencer.is_finished()
    }

    #[must_use]
    pub const fn session(&self) -> &InstrumentSession<L> {
        &self.session
    }

    #[must_use]
    pub const fn sequencer(&self) -> &Sequencer<I> {
        &self.sequencer
    }

    /// Commands idle (unless already idle) and closes the session.
    pub fn abort(&mut self) -> Result<(), L::Error> {
        self.session.close()
    }

    fn fault(&mut self, err: SessionError<L::Error>) -> ExperimentError<L::Error> {
        self.session.fail_safe();
        match err {
            SessionError::Channel(err) => ExperimentError::ChannelFault(err),
            SessionError::Malformed(err) | SessionError::Command(err) => {
                ExperimentError::Command(err)
            }
            SessionError::Closed => ExperimentError::Closed,
        }
    }
}
