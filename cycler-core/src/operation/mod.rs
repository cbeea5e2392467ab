//! Operation descriptors and the completion evaluator.
//!
//! An [`OperationSpec`] captures one command in flight: what was commanded, when
//! it was issued, when it must end, and the voltage window that was in force.
//! [`evaluate`] is a pure function over a spec and a sample; [`ActiveOperation`]
//! wraps a spec with the latch that makes completion a one-shot transition.

use core::{fmt, ops::Add, time::Duration};

use crate::telemetry::{CommandFrame, FrameError, OperatingMode, TelemetrySample, encode};

/// Commanded behavior plus the setpoints that go with it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OperationKind {
    Idle,
    Cccv {
        target_voltage: f32,
        current_limit: f32,
        cutoff_current: f32,
    },
    CurrentPulse {
        current: f32,
    },
    RegulatedCurrent {
        current: f32,
    },
}

impl OperationKind {
    /// Regulated charge (positive) or discharge (negative); zero current means idle.
    #[must_use]
    pub fn regulated(current: f32) -> Self {
        if current == 0.0 {
            OperationKind::Idle
        } else {
            OperationKind::RegulatedCurrent { current }
        }
    }

    /// Firmware mode this operation commands.
    #[must_use]
    pub const fn mode(&self) -> OperatingMode {
        match self {
            OperationKind::Idle => OperatingMode::Idle,
            OperationKind::Cccv { .. } => OperatingMode::ConstantCurrentConstantVoltage,
            OperationKind::CurrentPulse { .. } => OperatingMode::CurrentPulse,
            OperationKind::RegulatedCurrent { .. } => OperatingMode::RegulatedCurrent,
        }
    }

    /// Wire setpoints in command order.
    #[must_use]
    pub const fn setpoints(&self) -> [f32; 3] {
        match *self {
            OperationKind::Idle => [0.0, 0.0, 0.0],
            OperationKind::Cccv {
                target_voltage,
                current_limit,
                cutoff_current,
            } => [target_voltage, current_limit, cutoff_current],
            OperationKind::CurrentPulse { current }
            | OperationKind::RegulatedCurrent { current } => [0.0, current, 0.0],
        }
    }

    /// Cutoff current, only meaningful for CCCV charges.
    #[must_use]
    pub const fn cutoff_current(&self) -> Option<f32> {
        match *self {
            OperationKind::Cccv { cutoff_current, .. } => Some(cutoff_current),
            _ => None,
        }
    }

    /// Encodes the command frame for this operation.
    pub fn encode(&self) -> Result<CommandFrame, FrameError> {
        let [a, b, c] = self.setpoints();
        encode(self.mode(), a, b, c)
    }
}

/// Voltage bounds checked against every sample of an operation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VoltageWindow {
    pub upper: f32,
    pub lower: f32,
}

impl VoltageWindow {
    #[must_use]
    pub const fn new(upper: f32, lower: f32) -> Self {
        Self { upper, lower }
    }

    /// Window that never trips.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            upper: f32::INFINITY,
            lower: f32::NEG_INFINITY,
        }
    }
}

impl Default for VoltageWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Operation as authored in a step program, before it is stamped with time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub timeout: Duration,
    /// Replaces the voltage window in force; `None` keeps the previous one.
    pub limits: Option<VoltageWindow>,
}

impl OperationRequest {
    #[must_use]
    pub const fn new(kind: OperationKind, timeout: Duration) -> Self {
        Self {
            kind,
            timeout,
            limits: None,
        }
    }

    /// Attaches a replacement voltage window.
    #[must_use]
    pub const fn with_limits(mut self, limits: VoltageWindow) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Idle (rest) for the given duration.
    #[must_use]
    pub const fn rest(timeout: Duration) -> Self {
        Self::new(OperationKind::Idle, timeout)
    }

    /// CCCV charge bounded by `timeout`.
    #[must_use]
    pub const fn cccv(
        target_voltage: f32,
        current_limit: f32,
        cutoff_current: f32,
        timeout: Duration,
    ) -> Self {
        Self::new(
            OperationKind::Cccv {
                target_voltage,
                current_limit,
                cutoff_current,
            },
            timeout,
        )
    }

    /// Unregulated current pulse bounded by `timeout`.
    #[must_use]
    pub const fn pulse(current: f32, timeout: Duration) -> Self {
        Self::new(OperationKind::CurrentPulse { current }, timeout)
    }

    /// Regulated charge/discharge bounded by `timeout`.
    #[must_use]
    pub fn regulated(current: f32, timeout: Duration) -> Self {
        Self::new(OperationKind::regulated(current), timeout)
    }

    /// Stamps the request into a spec issued at `now`.
    #[must_use]
    pub fn issue<I>(&self, now: I, limits: VoltageWindow) -> OperationSpec<I>
    where
        I: Copy + Add<Duration, Output = I>,
    {
        OperationSpec {
            kind: self.kind,
            issued_at: now,
            deadline: now + self.timeout,
            limits,
        }
    }
}

/// One instrument command in flight. Read-only once issued.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OperationSpec<I> {
    pub kind: OperationKind,
    pub issued_at: I,
    pub deadline: I,
    pub limits: VoltageWindow,
}

impl<I> OperationSpec<I> {
    #[must_use]
    pub const fn target_mode(&self) -> OperatingMode {
        self.kind.mode()
    }
}

/// Why an operation is (or is not yet) complete.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompletionReason {
    StillRunning,
    TimedOut,
    CutoffCurrentReached,
    OverVoltage,
    UnderVoltage,
    /// Instrument has not yet switched to the commanded mode. Never terminal.
    ModeMismatch,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::StillRunning => f.write_str("still-running"),
            CompletionReason::TimedOut => f.write_str("timed-out"),
            CompletionReason::CutoffCurrentReached => f.write_str("cutoff-current"),
            CompletionReason::OverVoltage => f.write_str("over-voltage"),
            CompletionReason::UnderVoltage => f.write_str("under-voltage"),
            CompletionReason::ModeMismatch => f.write_str("mode-mismatch"),
        }
    }
}

/// Result of testing a sample against an operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompletionVerdict {
    pub complete: bool,
    pub reason: CompletionReason,
}

impl CompletionVerdict {
    #[must_use]
    pub const fn running() -> Self {
        Self {
            complete: false,
            reason: CompletionReason::StillRunning,
        }
    }

    #[must_use]
    pub const fn mode_mismatch() -> Self {
        Self {
            complete: false,
            reason: CompletionReason::ModeMismatch,
        }
    }

    #[must_use]
    pub const fn terminal(reason: CompletionReason) -> Self {
        Self {
            complete: true,
            reason,
        }
    }
}

/// Decides whether `sample` concludes `spec` at `now`.
///
/// Conditions are tested in a fixed order and the first match wins: mode
/// mismatch, deadline, CCCV cutoff current, over-voltage, under-voltage.
#[must_use]
pub fn evaluate<I>(spec: &OperationSpec<I>, sample: &TelemetrySample, now: I) -> CompletionVerdict
where
    I: Copy + Ord,
{
    if sample.mode != spec.target_mode() {
        return CompletionVerdict::mode_mismatch();
    }

    if now >= spec.deadline {
        return CompletionVerdict::terminal(CompletionReason::TimedOut);
    }

    if let Some(cutoff) = spec.kind.cutoff_current()
        && magnitude(sample.current) < cutoff
    {
        return CompletionVerdict::terminal(CompletionReason::CutoffCurrentReached);
    }

    if sample.voltage > spec.limits.upper {
        return CompletionVerdict::terminal(CompletionReason::OverVoltage);
    }

    if sample.voltage < spec.limits.lower {
        return CompletionVerdict::terminal(CompletionReason::UnderVoltage);
    }

    CompletionVerdict::running()
}

fn magnitude(value: f32) -> f32 {
    if value < 0.0 { -value } else { value }
}

/// Result of polling an [`ActiveOperation`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Poll {
    /// Not complete yet.
    Pending(CompletionVerdict),
    /// Completed on this poll; the caller should act on it exactly once.
    Settled(CompletionVerdict),
    /// Completed on an earlier poll; the stored verdict is returned unchanged.
    Latched(CompletionVerdict),
}

impl Poll {
    #[must_use]
    pub const fn verdict(&self) -> CompletionVerdict {
        match *self {
            Poll::Pending(verdict) | Poll::Settled(verdict) | Poll::Latched(verdict) => verdict,
        }
    }
}

/// Operation currently owned by the sequencer, with its settled latch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ActiveOperation<I> {
    spec: OperationSpec<I>,
    settled: Option<CompletionVerdict>,
}

impl<I> ActiveOperation<I>
where
    I: Copy + Ord,
{
    #[must_use]
    pub const fn new(spec: OperationSpec<I>) -> Self {
        Self {
            spec,
            settled: None,
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &OperationSpec<I> {
        &self.spec
    }

    /// Terminal verdict, once one has been produced.
    #[must_use]
    pub const fn settled(&self) -> Option<CompletionVerdict> {
        self.settled
    }

    /// Tests the sample, latching the first terminal verdict.
    pub fn poll(&mut self, sample: &TelemetrySample, now: I) -> Poll {
        if let Some(verdict) = self.settled {
            return Poll::Latched(verdict);
        }

        let verdict = evaluate(&self.spec, sample, now);
        if verdict.complete {
            self.settled = Some(verdict);
            Poll::Settled(verdict)
        } else {
            Poll::Pending(verdict)
        }
    }
}
