//! Step program data structures shared by every test protocol.
//!
//! A protocol is an ordered list of [`Step`]s plus a handful of [`Watch`]es.
//! Each step issues one operation (or finishes the run); when that operation
//! settles, the step's branches are tried in order and the first guard that
//! holds picks the next step, otherwise the cursor falls through to the next
//! index. Watches turn voltage thresholds into latched flags the guards can
//! read. The sequencer interprets these tables; nothing here keeps run state.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::operation::{OperationKind, OperationRequest};
use crate::telemetry::SETPOINT_RESOLUTION;

pub mod hppc;
pub mod incremental_ocv;
pub mod pseudo_ocv;
pub mod static_capacity;

pub use hppc::{HppcParams, hppc_program};
pub use incremental_ocv::{IncrementalOcvParams, incremental_ocv_program};
pub use pseudo_ocv::{PseudoOcvParams, pseudo_ocv_program};
pub use static_capacity::{StaticCapacityParams, static_capacity_program};

/// Longest program we expect to encode (HPPC) plus headroom.
pub const MAX_PROGRAM_STEPS: usize = 16;
/// Branches a single step may carry.
pub const MAX_STEP_BRANCHES: usize = 2;
/// Threshold watches a program may register.
pub const MAX_WATCHES: usize = 4;
/// Counter slots available to a program.
pub const MAX_COUNTERS: usize = 4;
/// Flag slots available to a program.
pub const MAX_FLAGS: usize = 4;
/// Longest timeout a step may carry. Deadlines are computed by adding the
/// timeout to the clock's instant, which must not overflow.
pub const MAX_OPERATION_TIMEOUT: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Named counter slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CounterId(pub u8);

impl CounterId {
    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Named flag slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlagId(pub u8);

impl FlagId {
    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Which test protocol a program implements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolKind {
    StaticCapacity,
    Hppc,
    IncrementalOcv,
    PseudoOcv,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::StaticCapacity => f.write_str("static-capacity"),
            ProtocolKind::Hppc => f.write_str("hppc"),
            ProtocolKind::IncrementalOcv => f.write_str("incremental-ocv"),
            ProtocolKind::PseudoOcv => f.write_str("pseudo-ocv"),
        }
    }
}

/// Protocol phase a step belongs to, reported alongside every sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Charging,
    Resting,
    PulseDischarge,
    PulseRest,
    PulseCharge,
    StepDischarge,
    StepRest,
    StepCharge,
    Discharging,
    /// Slow regulated charge of an open-circuit-voltage sweep.
    SweepCharge,
    FinalCharge,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Charging => "charging",
            Phase::Resting => "resting",
            Phase::PulseDischarge => "pulse-discharge",
            Phase::PulseRest => "pulse-rest",
            Phase::PulseCharge => "pulse-charge",
            Phase::StepDischarge => "step-discharge",
            Phase::StepRest => "step-rest",
            Phase::StepCharge => "step-charge",
            Phase::Discharging => "discharging",
            Phase::SweepCharge => "sweep-charge",
            Phase::FinalCharge => "final-charge",
            Phase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// What a step does when the cursor enters it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StepAction {
    Issue(OperationRequest),
    /// Command idle and end the run.
    Finish,
}

/// Predicate guarding a branch edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Guard {
    Always,
    Flag(FlagId),
    NotFlag(FlagId),
    CounterBelow { counter: CounterId, limit: u16 },
}

/// Conditional edge taken when a step's operation settles.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Branch {
    pub guard: Guard,
    pub target: usize,
}

/// Voltage crossing tested against every sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Threshold {
    Below(f32),
    Above(f32),
}

impl Threshold {
    #[must_use]
    pub fn crossed(&self, voltage: f32) -> bool {
        match *self {
            Threshold::Below(limit) => voltage < limit,
            Threshold::Above(limit) => voltage > limit,
        }
    }
}

/// Latches `flag` the first time the threshold is crossed while armed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Watch {
    pub flag: FlagId,
    pub threshold: Threshold,
    /// Watch stays inert until this flag is set.
    pub armed_by: Option<FlagId>,
}

impl Watch {
    #[must_use]
    pub const fn new(flag: FlagId, threshold: Threshold) -> Self {
        Self {
            flag,
            threshold,
            armed_by: None,
        }
    }

    #[must_use]
    pub const fn armed_by(mut self, flag: FlagId) -> Self {
        self.armed_by = Some(flag);
        self
    }
}

/// One entry of a step program.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub phase: Phase,
    pub action: StepAction,
    /// Counter incremented each time this step's operation settles.
    pub tally: Option<CounterId>,
    pub branches: Vec<Branch, MAX_STEP_BRANCHES>,
}

impl Step {
    #[must_use]
    pub const fn issue(phase: Phase, request: OperationRequest) -> Self {
        Self {
            phase,
            action: StepAction::Issue(request),
            tally: None,
            branches: Vec::new(),
        }
    }

    #[must_use]
    pub const fn finish() -> Self {
        Self {
            phase: Phase::Finished,
            action: StepAction::Finish,
            tally: None,
            branches: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_tally(mut self, counter: CounterId) -> Self {
        self.tally = Some(counter);
        self
    }

    /// Appends a branch edge; earlier branches take priority.
    pub fn branch(mut self, guard: Guard, target: usize) -> Result<Self, ProgramError> {
        self.branches
            .push(Branch { guard, target })
            .map_err(|_| ProgramError::Capacity)?;
        Ok(self)
    }

    #[must_use]
    pub const fn is_finish(&self) -> bool {
        matches!(self.action, StepAction::Finish)
    }

    /// Operation this step issues; `Finish` issues idle.
    #[must_use]
    pub const fn operation(&self) -> OperationRequest {
        match self.action {
            StepAction::Issue(request) => request,
            StepAction::Finish => OperationRequest::new(OperationKind::Idle, core::time::Duration::ZERO),
        }
    }
}

/// Reasons a step program is rejected before any operation is issued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProgramError {
    Empty,
    Capacity,
    BranchTarget { step: usize, target: usize },
    UndefinedCounter(CounterId),
    UndefinedFlag(FlagId),
    /// A guard reads a flag no watch ever sets.
    UnsetFlag { step: usize, flag: FlagId },
    /// A guard reads a counter no step ever tallies.
    UntalliedCounter { step: usize, counter: CounterId },
    FallsOffEnd { step: usize },
    NoFinish,
    NonFiniteSetpoint { step: usize },
    /// A non-zero setpoint would be sent as zero on the wire.
    SetpointBelowResolution { step: usize },
    /// The timeout exceeds [`MAX_OPERATION_TIMEOUT`].
    TimeoutTooLong { step: usize },
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramError::Empty => f.write_str("step program is empty"),
            ProgramError::Capacity => f.write_str("step program exceeds its capacity"),
            ProgramError::BranchTarget { step, target } => {
                write!(f, "step {step} branches to undefined step {target}")
            }
            ProgramError::UndefinedCounter(counter) => {
                write!(f, "counter {} is out of range", counter.0)
            }
            ProgramError::UndefinedFlag(flag) => write!(f, "flag {} is out of range", flag.0),
            ProgramError::UnsetFlag { step, flag } => {
                write!(f, "step {step} reads flag {} which no watch sets", flag.0)
            }
            ProgramError::UntalliedCounter { step, counter } => {
                write!(f, "step {step} reads counter {} which no step tallies", counter.0)
            }
            ProgramError::FallsOffEnd { step } => {
                write!(f, "step {step} can run past the end of the program")
            }
            ProgramError::NoFinish => f.write_str("step program never finishes"),
            ProgramError::NonFiniteSetpoint { step } => {
                write!(f, "step {step} has a non-finite setpoint or limit")
            }
            ProgramError::SetpointBelowResolution { step } => write!(
                f,
                "step {step} has a setpoint smaller than the wire resolution of {SETPOINT_RESOLUTION}"
            ),
            ProgramError::TimeoutTooLong { step } => write!(
                f,
                "step {step} has a timeout longer than {} s",
                MAX_OPERATION_TIMEOUT.as_secs()
            ),
        }
    }
}

impl core::error::Error for ProgramError {}

/// Ordered steps and watches for one protocol run.
#[derive(Clone, Debug, PartialEq)]
pub struct StepProgram {
    kind: ProtocolKind,
    steps: Vec<Step, MAX_PROGRAM_STEPS>,
    watches: Vec<Watch, MAX_WATCHES>,
}

impl StepProgram {
    #[must_use]
    pub const fn new(kind: ProtocolKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            watches: Vec::new(),
        }
    }

    /// Appends a step and returns its index.
    pub fn push(&mut self, step: Step) -> Result<usize, ProgramError> {
        let index = self.steps.len();
        self.steps.push(step).map_err(|_| ProgramError::Capacity)?;
        Ok(index)
    }

    pub fn watch(&mut self, watch: Watch) -> Result<(), ProgramError> {
        self.watches.push(watch).map_err(|_| ProgramError::Capacity)
    }

    #[must_use]
    pub const fn kind(&self) -> ProtocolKind {
        self.kind
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Checks every reference in the program resolves.
    pub fn validate(&self) -> Result<(), ProgramError> {
        if self.steps.is_empty() {
            return Err(ProgramError::Empty);
        }

        let mut flags_set = [false; MAX_FLAGS];
        for watch in &self.watches {
            check_flag(watch.flag)?;
            if let Some(arming) = watch.armed_by {
                check_flag(arming)?;
            }
            flags_set[watch.flag.as_index()] = true;
        }

        let mut counters_tallied = [false; MAX_COUNTERS];
        for step in &self.steps {
            if let Some(counter) = step.tally {
                check_counter(counter)?;
                counters_tallied[counter.as_index()] = true;
            }
        }

        let last = self.steps.len() - 1;
        for (index, step) in self.steps.iter().enumerate() {
            if let StepAction::Issue(request) = step.action {
                if !request_is_finite(&request) {
                    return Err(ProgramError::NonFiniteSetpoint { step: index });
                }
                if !request_is_representable(&request) {
                    return Err(ProgramError::SetpointBelowResolution { step: index });
                }
                if request.timeout > MAX_OPERATION_TIMEOUT {
                    return Err(ProgramError::TimeoutTooLong { step: index });
                }
                let unconditional = step.branches.iter().any(|b| b.guard == Guard::Always);
                if index == last && !unconditional {
                    return Err(ProgramError::FallsOffEnd { step: index });
                }
            }

            for branch in &step.branches {
                if branch.target > last {
                    return Err(ProgramError::BranchTarget {
                        step: index,
                        target: branch.target,
                    });
                }
                match branch.guard {
                    Guard::Always => {}
                    Guard::Flag(flag) | Guard::NotFlag(flag) => {
                        check_flag(flag)?;
                        if !flags_set[flag.as_index()] {
                            return Err(ProgramError::UnsetFlag { step: index, flag });
                        }
                    }
                    Guard::CounterBelow { counter, .. } => {
                        check_counter(counter)?;
                        if !counters_tallied[counter.as_index()] {
                            return Err(ProgramError::UntalliedCounter {
                                step: index,
                                counter,
                            });
                        }
                    }
                }
            }
        }

        if !self.steps.iter().any(Step::is_finish) {
            return Err(ProgramError::NoFinish);
        }

        Ok(())
    }
}

fn check_flag(flag: FlagId) -> Result<(), ProgramError> {
    if flag.as_index() < MAX_FLAGS {
        Ok(())
    } else {
        Err(ProgramError::UndefinedFlag(flag))
    }
}

fn check_counter(counter: CounterId) -> Result<(), ProgramError> {
    if counter.as_index() < MAX_COUNTERS {
        Ok(())
    } else {
        Err(ProgramError::UndefinedCounter(counter))
    }
}

fn request_is_finite(request: &OperationRequest) -> bool {
    let setpoints_finite = request.kind.setpoints().iter().all(|value| value.is_finite());
    let limits_valid = request
        .limits
        .is_none_or(|window| !window.upper.is_nan() && !window.lower.is_nan());
    setpoints_finite && limits_valid
}

fn request_is_representable(request: &OperationRequest) -> bool {
    request.kind.setpoints().iter().all(|&value| {
        let magnitude = if value < 0.0 { -value } else { value };
        magnitude <= 0.0 || magnitude >= SETPOINT_RESOLUTION
    })
}
