//! Pseudo open-circuit-voltage sweep.
//!
//! A very slow constant-current discharge to the lower voltage followed by an
//! equally slow charge to the upper voltage. At such low current the terminal
//! voltage tracks the open-circuit curve closely.

use core::time::Duration;

use super::{Phase, ProgramError, ProtocolKind, Step, StepProgram};
use crate::operation::{OperationRequest, VoltageWindow};

pub const DEFAULT_CHARGE_VOLTAGE: f32 = 4.1;
pub const DEFAULT_CHARGE_CURRENT: f32 = 0.75;
pub const DEFAULT_CUTOFF_CURRENT: f32 = 0.075;
pub const DEFAULT_CHARGE_TIMEOUT: Duration = Duration::from_secs(10_000);
pub const DEFAULT_INITIAL_REST: Duration = Duration::from_secs(3_600);
pub const DEFAULT_LOWER_VOLTAGE: f32 = 1.5;
pub const DEFAULT_SWEEP_DISCHARGE_CURRENT: f32 = -0.075;
pub const DEFAULT_SWEEP_DISCHARGE_TIMEOUT: Duration = Duration::from_secs(80_000);
pub const DEFAULT_UPPER_VOLTAGE: f32 = 4.1;
pub const DEFAULT_SWEEP_CHARGE_CURRENT: f32 = 0.075;
pub const DEFAULT_SWEEP_CHARGE_TIMEOUT: Duration = Duration::from_secs(80_000);

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PseudoOcvParams {
    pub charge_voltage: f32,
    pub charge_current: f32,
    pub cutoff_current: f32,
    pub charge_timeout: Duration,
    pub initial_rest: Duration,
    pub lower_voltage: f32,
    pub sweep_discharge_current: f32,
    pub sweep_discharge_timeout: Duration,
    pub upper_voltage: f32,
    pub sweep_charge_current: f32,
    pub sweep_charge_timeout: Duration,
}

impl Default for PseudoOcvParams {
    fn default() -> Self {
        Self {
            charge_voltage: DEFAULT_CHARGE_VOLTAGE,
            charge_current: DEFAULT_CHARGE_CURRENT,
            cutoff_current: DEFAULT_CUTOFF_CURRENT,
            charge_timeout: DEFAULT_CHARGE_TIMEOUT,
            initial_rest: DEFAULT_INITIAL_REST,
            lower_voltage: DEFAULT_LOWER_VOLTAGE,
            sweep_discharge_current: DEFAULT_SWEEP_DISCHARGE_CURRENT,
            sweep_discharge_timeout: DEFAULT_SWEEP_DISCHARGE_TIMEOUT,
            upper_voltage: DEFAULT_UPPER_VOLTAGE,
            sweep_charge_current: DEFAULT_SWEEP_CHARGE_CURRENT,
            sweep_charge_timeout: DEFAULT_SWEEP_CHARGE_TIMEOUT,
        }
    }
}

/// Builds and validates the pseudo OCV program.
pub fn pseudo_ocv_program(params: &PseudoOcvParams) -> Result<StepProgram, ProgramError> {
    let mut program = StepProgram::new(ProtocolKind::PseudoOcv);
    program.push(Step::issue(
        Phase::Charging,
        OperationRequest::cccv(
            params.charge_voltage,
            params.charge_current,
            params.cutoff_current,
            params.charge_timeout,
        )
        .with_limits(VoltageWindow::new(
            params.charge_voltage + 0.1,
            params.lower_voltage - 0.1,
        )),
    ))?;
    program.push(Step::issue(
        Phase::Resting,
        OperationRequest::rest(params.initial_rest),
    ))?;
    // The sweep legs end on their voltage window, the timeout is only a backstop.
    program.push(Step::issue(
        Phase::Discharging,
        OperationRequest::regulated(params.sweep_discharge_current, params.sweep_discharge_timeout)
            .with_limits(VoltageWindow::new(
                params.charge_voltage + 0.1,
                params.lower_voltage,
            )),
    ))?;
    program.push(Step::issue(
        Phase::SweepCharge,
        OperationRequest::regulated(params.sweep_charge_current, params.sweep_charge_timeout)
            .with_limits(VoltageWindow::new(
                params.upper_voltage,
                params.lower_voltage - 0.1,
            )),
    ))?;
    program.push(Step::finish())?;
    program.validate()?;
    Ok(program)
}
