//! Static capacity test.
//!
//! Charge the cell with CCCV, discharge it at constant current down to the
//! cutoff voltage, then charge it back up. The discharge leg is what measures
//! capacity; both charges use a window slightly wider than the cell's range.

use core::time::Duration;

use super::{Phase, ProgramError, ProtocolKind, Step, StepProgram};
use crate::operation::{OperationRequest, VoltageWindow};

pub const DEFAULT_CHARGE_VOLTAGE: f32 = 4.1;
pub const DEFAULT_CHARGE_CURRENT: f32 = 0.75;
pub const DEFAULT_CUTOFF_CURRENT: f32 = 0.075;
pub const DEFAULT_CHARGE_TIMEOUT: Duration = Duration::from_secs(10_000);
pub const DEFAULT_DISCHARGE_CURRENT: f32 = -0.75;
pub const DEFAULT_CUTOFF_VOLTAGE: f32 = 1.5;
pub const DEFAULT_DISCHARGE_TIMEOUT: Duration = Duration::from_secs(10_000);

/// Margin added above the charge voltage for every window.
const UPPER_MARGIN: f32 = 0.1;
/// Margin below the cutoff voltage tolerated while charging.
const CHARGE_LOWER_MARGIN: f32 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StaticCapacityParams {
    pub charge_voltage: f32,
    pub charge_current: f32,
    pub cutoff_current: f32,
    pub charge_timeout: Duration,
    /// Negative for discharge.
    pub discharge_current: f32,
    pub cutoff_voltage: f32,
    pub discharge_timeout: Duration,
}

impl Default for StaticCapacityParams {
    fn default() -> Self {
        Self {
            charge_voltage: DEFAULT_CHARGE_VOLTAGE,
            charge_current: DEFAULT_CHARGE_CURRENT,
            cutoff_current: DEFAULT_CUTOFF_CURRENT,
            charge_timeout: DEFAULT_CHARGE_TIMEOUT,
            discharge_current: DEFAULT_DISCHARGE_CURRENT,
            cutoff_voltage: DEFAULT_CUTOFF_VOLTAGE,
            discharge_timeout: DEFAULT_DISCHARGE_TIMEOUT,
        }
    }
}

impl StaticCapacityParams {
    fn charge(&self) -> OperationRequest {
        OperationRequest::cccv(
            self.charge_voltage,
            self.charge_current,
            self.cutoff_current,
            self.charge_timeout,
        )
        .with_limits(VoltageWindow::new(
            self.charge_voltage + UPPER_MARGIN,
            self.cutoff_voltage - CHARGE_LOWER_MARGIN,
        ))
    }

    fn discharge(&self) -> OperationRequest {
        OperationRequest::regulated(self.discharge_current, self.discharge_timeout).with_limits(
            VoltageWindow::new(self.charge_voltage + UPPER_MARGIN, self.cutoff_voltage),
        )
    }
}

/// Builds and validates the static capacity program.
pub fn static_capacity_program(params: &StaticCapacityParams) -> Result<StepProgram, ProgramError> {
    let mut program = StepProgram::new(ProtocolKind::StaticCapacity);
    program.push(Step::issue(Phase::Charging, params.charge()))?;
    program.push(Step::issue(Phase::Discharging, params.discharge()))?;
    program.push(Step::issue(Phase::FinalCharge, params.charge()))?;
    program.push(Step::finish())?;
    program.validate()?;
    Ok(program)
}
