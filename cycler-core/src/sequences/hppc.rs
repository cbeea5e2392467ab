//! Hybrid pulse power characterization (HPPC).
//!
//! After a full CCCV charge and a rest, the cell runs a fixed number of pulse
//! sub-cycles: discharge pulse, pause, charge pulse, pause, a slow step
//! discharge that removes a slice of capacity, then a long rest. A final CCCV
//! charge restores the cell before the run ends.

use core::time::Duration;

use super::{CounterId, Guard, Phase, ProgramError, ProtocolKind, Step, StepProgram};
use crate::operation::{OperationRequest, VoltageWindow};

pub const DEFAULT_CHARGE_VOLTAGE: f32 = 4.1;
pub const DEFAULT_CHARGE_CURRENT: f32 = 0.75;
pub const DEFAULT_CUTOFF_CURRENT: f32 = 0.075;
pub const DEFAULT_CHARGE_TIMEOUT: Duration = Duration::from_secs(10_000);
pub const DEFAULT_CUTOFF_VOLTAGE: f32 = 1.5;
pub const DEFAULT_INITIAL_REST: Duration = Duration::from_secs(3_600);
pub const DEFAULT_DISCHARGE_PULSE_CURRENT: f32 = -3.0;
pub const DEFAULT_DISCHARGE_PULSE: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCHARGE_PULSE_PAUSE: Duration = Duration::from_secs(40);
pub const DEFAULT_CHARGE_PULSE_CURRENT: f32 = 3.0;
pub const DEFAULT_CHARGE_PULSE: Duration = Duration::from_secs(10);
pub const DEFAULT_CHARGE_PULSE_PAUSE: Duration = Duration::from_secs(40);
pub const DEFAULT_STEP_DISCHARGE_CURRENT: f32 = -0.1;
pub const DEFAULT_STEP_DISCHARGE: Duration = Duration::from_secs(1_000);
pub const DEFAULT_STEP_REST: Duration = Duration::from_secs(3_600);
pub const DEFAULT_CYCLES: u16 = 10;

/// Window applied to both current pulses.
pub const PULSE_WINDOW: VoltageWindow = VoltageWindow::new(4.5, 0.5);
/// Upper bound during the step discharge.
pub const STEP_DISCHARGE_UPPER: f32 = 4.2;
/// Upper bound during the rest after a step discharge.
pub const STEP_REST_UPPER: f32 = 4.4;

/// Counts completed pulse sub-cycles.
pub const CYCLES: CounterId = CounterId(0);

/// Operations issued by one pulse sub-cycle.
pub const SUB_CYCLE_OPERATIONS: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HppcParams {
    pub charge_voltage: f32,
    pub charge_current: f32,
    pub cutoff_current: f32,
    pub charge_timeout: Duration,
    pub cutoff_voltage: f32,
    pub initial_rest: Duration,
    pub discharge_pulse_current: f32,
    pub discharge_pulse: Duration,
    pub discharge_pulse_pause: Duration,
    pub charge_pulse_current: f32,
    pub charge_pulse: Duration,
    pub charge_pulse_pause: Duration,
    pub step_discharge_current: f32,
    pub step_discharge: Duration,
    pub step_rest: Duration,
    pub cycles: u16,
}

impl Default for HppcParams {
    fn default() -> Self {
        Self {
            charge_voltage: DEFAULT_CHARGE_VOLTAGE,
            charge_current: DEFAULT_CHARGE_CURRENT,
            cutoff_current: DEFAULT_CUTOFF_CURRENT,
            charge_timeout: DEFAULT_CHARGE_TIMEOUT,
            cutoff_voltage: DEFAULT_CUTOFF_VOLTAGE,
            initial_rest: DEFAULT_INITIAL_REST,
            discharge_pulse_current: DEFAULT_DISCHARGE_PULSE_CURRENT,
            discharge_pulse: DEFAULT_DISCHARGE_PULSE,
            discharge_pulse_pause: DEFAULT_DISCHARGE_PULSE_PAUSE,
            charge_pulse_current: DEFAULT_CHARGE_PULSE_CURRENT,
            charge_pulse: DEFAULT_CHARGE_PULSE,
            charge_pulse_pause: DEFAULT_CHARGE_PULSE_PAUSE,
            step_discharge_current: DEFAULT_STEP_DISCHARGE_CURRENT,
            step_discharge: DEFAULT_STEP_DISCHARGE,
            step_rest: DEFAULT_STEP_REST,
            cycles: DEFAULT_CYCLES,
        }
    }
}

impl HppcParams {
    fn charge(&self) -> OperationRequest {
        OperationRequest::cccv(
            self.charge_voltage,
            self.charge_current,
            self.cutoff_current,
            self.charge_timeout,
        )
        .with_limits(VoltageWindow::new(
            self.charge_voltage + 0.1,
            self.cutoff_voltage - 0.1,
        ))
    }
}

/// Builds and validates the HPPC program.
///
/// Zero cycles skips the pulse section entirely.
pub fn hppc_program(params: &HppcParams) -> Result<StepProgram, ProgramError> {
    let mut program = StepProgram::new(ProtocolKind::Hppc);
    program.push(Step::issue(Phase::Charging, params.charge()))?;
    program.push(Step::issue(
        Phase::Resting,
        OperationRequest::rest(params.initial_rest),
    ))?;

    if params.cycles > 0 {
        let first = program.push(Step::issue(
            Phase::PulseDischarge,
            OperationRequest::pulse(params.discharge_pulse_current, params.discharge_pulse)
                .with_limits(PULSE_WINDOW),
        ))?;
        program.push(Step::issue(
            Phase::PulseRest,
            OperationRequest::rest(params.discharge_pulse_pause),
        ))?;
        program.push(Step::issue(
            Phase::PulseCharge,
            OperationRequest::pulse(params.charge_pulse_current, params.charge_pulse)
                .with_limits(PULSE_WINDOW),
        ))?;
        program.push(Step::issue(
            Phase::PulseRest,
            OperationRequest::rest(params.charge_pulse_pause),
        ))?;
        program.push(Step::issue(
            Phase::StepDischarge,
            OperationRequest::regulated(params.step_discharge_current, params.step_discharge)
                .with_limits(VoltageWindow::new(
                    STEP_DISCHARGE_UPPER,
                    params.cutoff_voltage,
                )),
        ))?;
        program.push(
            Step::issue(
                Phase::StepRest,
                OperationRequest::rest(params.step_rest).with_limits(VoltageWindow::new(
                    STEP_REST_UPPER,
                    params.cutoff_voltage - 0.1,
                )),
            )
            .with_tally(CYCLES)
            .branch(
                Guard::CounterBelow {
                    counter: CYCLES,
                    limit: params.cycles,
                },
                first,
            )?,
        )?;
    }

    program.push(Step::issue(Phase::FinalCharge, params.charge()))?;
    program.push(Step::finish())?;
    program.validate()?;
    Ok(program)
}
