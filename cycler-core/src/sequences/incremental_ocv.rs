//! Incremental open-circuit-voltage test.
//!
//! The cell is charged, rested, then walked down in fixed charge increments
//! with a relaxation wait after each one until the lower threshold is seen.
//! The walk then reverses and climbs back up until the upper threshold is
//! seen. Threshold crossings are latched by watches on every sample; the upper
//! watch is only armed once the lower one has fired so the initial charge
//! cannot end the run early.

use core::time::Duration;

use super::{
    CounterId, FlagId, Guard, Phase, ProgramError, ProtocolKind, Step, StepProgram, Threshold,
    Watch,
};
use crate::operation::{OperationRequest, VoltageWindow};

pub const DEFAULT_CHARGE_VOLTAGE: f32 = 4.1;
pub const DEFAULT_CHARGE_CURRENT: f32 = 0.75;
pub const DEFAULT_CUTOFF_CURRENT: f32 = 0.075;
pub const DEFAULT_CHARGE_TIMEOUT: Duration = Duration::from_secs(10_000);
pub const DEFAULT_INITIAL_REST: Duration = Duration::from_secs(3_600);
pub const DEFAULT_LOWER_THRESHOLD: f32 = 1.5;
pub const DEFAULT_DISCHARGE_CURRENT: f32 = -1.0;
pub const DEFAULT_DISCHARGE_STEP: Duration = Duration::from_secs(270);
pub const DEFAULT_DISCHARGE_WAIT: Duration = Duration::from_secs(1_200);
pub const DEFAULT_UPPER_THRESHOLD: f32 = 4.1;
pub const DEFAULT_STEP_CHARGE_CURRENT: f32 = 1.0;
pub const DEFAULT_CHARGE_STEP: Duration = Duration::from_secs(270);
pub const DEFAULT_CHARGE_WAIT: Duration = Duration::from_secs(1_200);

/// Set once the voltage has dropped below the lower threshold.
pub const LOWER_REACHED: FlagId = FlagId(0);
/// Set once the voltage has risen above the upper threshold after the lower one.
pub const UPPER_REACHED: FlagId = FlagId(1);

pub const DISCHARGE_STEPS: CounterId = CounterId(0);
pub const CHARGE_STEPS: CounterId = CounterId(1);

const DISCHARGE_STEP: usize = 2;
const CHARGE_STEP: usize = 4;
const FINISH_STEP: usize = 6;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IncrementalOcvParams {
    pub charge_voltage: f32,
    pub charge_current: f32,
    pub cutoff_current: f32,
    pub charge_timeout: Duration,
    pub initial_rest: Duration,
    pub lower_threshold: f32,
    pub discharge_current: f32,
    pub discharge_step: Duration,
    pub discharge_wait: Duration,
    pub upper_threshold: f32,
    pub step_charge_current: f32,
    pub charge_step: Duration,
    pub charge_wait: Duration,
}

impl Default for IncrementalOcvParams {
    fn default() -> Self {
        Self {
            charge_voltage: DEFAULT_CHARGE_VOLTAGE,
            charge_current: DEFAULT_CHARGE_CURRENT,
            cutoff_current: DEFAULT_CUTOFF_CURRENT,
            charge_timeout: DEFAULT_CHARGE_TIMEOUT,
            initial_rest: DEFAULT_INITIAL_REST,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            discharge_current: DEFAULT_DISCHARGE_CURRENT,
            discharge_step: DEFAULT_DISCHARGE_STEP,
            discharge_wait: DEFAULT_DISCHARGE_WAIT,
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            step_charge_current: DEFAULT_STEP_CHARGE_CURRENT,
            charge_step: DEFAULT_CHARGE_STEP,
            charge_wait: DEFAULT_CHARGE_WAIT,
        }
    }
}

/// Builds and validates the incremental OCV program.
pub fn incremental_ocv_program(params: &IncrementalOcvParams) -> Result<StepProgram, ProgramError> {
    let mut program = StepProgram::new(ProtocolKind::IncrementalOcv);
    program.watch(Watch::new(
        LOWER_REACHED,
        Threshold::Below(params.lower_threshold),
    ))?;
    program.watch(
        Watch::new(UPPER_REACHED, Threshold::Above(params.upper_threshold))
            .armed_by(LOWER_REACHED),
    )?;

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
            params.lower_threshold - 0.1,
        )),
    ))?;
    program.push(Step::issue(
        Phase::Resting,
        OperationRequest::rest(params.initial_rest),
    ))?;
    program.push(
        Step::issue(
            Phase::StepDischarge,
            OperationRequest::regulated(params.discharge_current, params.discharge_step),
        )
        .with_tally(DISCHARGE_STEPS)
        .branch(Guard::Flag(LOWER_REACHED), CHARGE_STEP)?,
    )?;
    program.push(
        Step::issue(
            Phase::StepRest,
            OperationRequest::rest(params.discharge_wait),
        )
        .branch(Guard::NotFlag(LOWER_REACHED), DISCHARGE_STEP)?,
    )?;
    program.push(
        Step::issue(
            Phase::StepCharge,
            OperationRequest::regulated(params.step_charge_current, params.charge_step)
                .with_limits(VoltageWindow::new(
                    params.charge_voltage + 0.05,
                    params.lower_threshold - 0.1,
                )),
        )
        .with_tally(CHARGE_STEPS)
        .branch(Guard::Flag(UPPER_REACHED), FINISH_STEP)?,
    )?;
    program.push(
        Step::issue(Phase::StepRest, OperationRequest::rest(params.charge_wait))
            .branch(Guard::NotFlag(UPPER_REACHED), CHARGE_STEP)?,
    )?;
    program.push(Step::finish())?;
    program.validate()?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_program_layout() {
        let program = incremental_ocv_program(&IncrementalOcvParams::default())
            .expect("default program validates");
        assert_eq!(program.len(), 7);
        assert!(program.steps()[FINISH_STEP].is_finish());
        assert_eq!(program.steps()[DISCHARGE_STEP].phase, Phase::StepDischarge);
        assert_eq!(program.steps()[CHARGE_STEP].phase, Phase::StepCharge);
        assert_eq!(program.steps()[DISCHARGE_STEP].tally, Some(DISCHARGE_STEPS));
        assert_eq!(program.steps()[CHARGE_STEP].tally, Some(CHARGE_STEPS));
    }

    #[test]
    fn upper_watch_is_armed_by_lower() {
        let program = incremental_ocv_program(&IncrementalOcvParams::default())
            .expect("default program validates");
        let watches = program.watches();
        assert_eq!(watches.len(), 2);
        assert_eq!(watches[0].flag, LOWER_REACHED);
        assert_eq!(watches[0].armed_by, None);
        assert_eq!(watches[1].flag, UPPER_REACHED);
        assert_eq!(watches[1].armed_by, Some(LOWER_REACHED));
    }
}
