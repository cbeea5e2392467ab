//! Command-line configuration.
//!
//! Everything here is read once at startup. Each protocol subcommand turns its
//! flags into the matching parameter struct and builds a validated program.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use cycler_core::sequences::{
    HppcParams, IncrementalOcvParams, ProgramError, PseudoOcvParams, StaticCapacityParams,
    StepProgram, hppc, hppc_program, incremental_ocv, incremental_ocv_program, pseudo_ocv,
    pseudo_ocv_program, static_capacity, static_capacity_program,
};

pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Parser)]
#[command(
    name = "cycler",
    about = "Run a test protocol on a serial battery cycler",
    version
)]
pub struct Cli {
    /// Serial port the instrument is attached to
    #[arg(long, env = "CYCLER_PORT")]
    pub port: String,

    /// Serial baud rate
    #[arg(long, env = "CYCLER_BAUD", default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// CSV log file; appended to if it exists (default depends on the protocol)
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Log every sample
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub protocol: ProtocolCommand,
}

impl Cli {
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.log
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.protocol.default_log_name()))
    }
}

#[derive(Debug, Subcommand)]
pub enum ProtocolCommand {
    /// Charge, discharge to the cutoff voltage, charge again
    StaticCapacity(StaticCapacityArgs),
    /// Hybrid pulse power characterization
    Hppc(HppcArgs),
    /// Open-circuit voltage by fixed charge increments with relaxation waits
    IncrementalOcv(IncrementalOcvArgs),
    /// Open-circuit voltage by a very slow discharge and charge sweep
    PseudoOcv(PseudoOcvArgs),
}

impl ProtocolCommand {
    pub fn program(&self) -> Result<StepProgram, ProgramError> {
        match self {
            ProtocolCommand::StaticCapacity(args) => static_capacity_program(&args.params()),
            ProtocolCommand::Hppc(args) => hppc_program(&args.params()),
            ProtocolCommand::IncrementalOcv(args) => incremental_ocv_program(&args.params()),
            ProtocolCommand::PseudoOcv(args) => pseudo_ocv_program(&args.params()),
        }
    }

    #[must_use]
    pub const fn default_log_name(&self) -> &'static str {
        match self {
            ProtocolCommand::StaticCapacity(_) => "static_test.csv",
            ProtocolCommand::Hppc(_) => "hppc_test.csv",
            ProtocolCommand::IncrementalOcv(_) => "ocv_test_inc.csv",
            ProtocolCommand::PseudoOcv(_) => "ocv_test.csv",
        }
    }
}

/// Shared CCCV charge flags.
#[derive(Debug, Args)]
pub struct ChargeArgs {
    /// CCCV target voltage (V)
    #[arg(long, default_value_t = static_capacity::DEFAULT_CHARGE_VOLTAGE)]
    pub charge_voltage: f32,

    /// CCCV current limit (A)
    #[arg(long, default_value_t = static_capacity::DEFAULT_CHARGE_CURRENT)]
    pub charge_current: f32,

    /// Current below which a CCCV charge is complete (A); setpoints go out with
    /// four decimals, so non-zero values under 0.00005 are rejected
    #[arg(long, default_value_t = static_capacity::DEFAULT_CUTOFF_CURRENT)]
    pub cutoff_current: f32,

    /// CCCV charge timeout (s); timeouts above 366 days are rejected
    #[arg(long, default_value_t = static_capacity::DEFAULT_CHARGE_TIMEOUT.as_secs())]
    pub charge_timeout: u64,
}

#[derive(Debug, Args)]
pub struct StaticCapacityArgs {
    #[command(flatten)]
    pub charge: ChargeArgs,

    /// Discharge current, negative (A)
    #[arg(long, allow_negative_numbers = true, default_value_t = static_capacity::DEFAULT_DISCHARGE_CURRENT)]
    pub discharge_current: f32,

    /// Discharge ends below this voltage (V)
    #[arg(long, default_value_t = static_capacity::DEFAULT_CUTOFF_VOLTAGE)]
    pub cutoff_voltage: f32,

    /// Discharge timeout (s)
    #[arg(long, default_value_t = static_capacity::DEFAULT_DISCHARGE_TIMEOUT.as_secs())]
    pub discharge_timeout: u64,
}

impl StaticCapacityArgs {
    #[must_use]
    pub fn params(&self) -> StaticCapacityParams {
        StaticCapacityParams {
            charge_voltage: self.charge.charge_voltage,
            charge_current: self.charge.charge_current,
            cutoff_current: self.charge.cutoff_current,
            charge_timeout: Duration::from_secs(self.charge.charge_timeout),
            discharge_current: self.discharge_current,
            cutoff_voltage: self.cutoff_voltage,
            discharge_timeout: Duration::from_secs(self.discharge_timeout),
        }
    }
}

#[derive(Debug, Args)]
pub struct HppcArgs {
    #[command(flatten)]
    pub charge: ChargeArgs,

    /// Lowest voltage tolerated outside the pulses (V)
    #[arg(long, default_value_t = hppc::DEFAULT_CUTOFF_VOLTAGE)]
    pub cutoff_voltage: f32,

    /// Rest after the initial charge (s)
    #[arg(long, default_value_t = hppc::DEFAULT_INITIAL_REST.as_secs())]
    pub initial_rest: u64,

    /// Discharge pulse current, negative (A)
    #[arg(long, allow_negative_numbers = true, default_value_t = hppc::DEFAULT_DISCHARGE_PULSE_CURRENT)]
    pub discharge_pulse_current: f32,

    /// Discharge pulse length (s)
    #[arg(long, default_value_t = hppc::DEFAULT_DISCHARGE_PULSE.as_secs())]
    pub discharge_pulse: u64,

    /// Pause after the discharge pulse (s)
    #[arg(long, default_value_t = hppc::DEFAULT_DISCHARGE_PULSE_PAUSE.as_secs())]
    pub discharge_pulse_pause: u64,

    /// Charge pulse current (A)
    #[arg(long, default_value_t = hppc::DEFAULT_CHARGE_PULSE_CURRENT)]
    pub charge_pulse_current: f32,

    /// Charge pulse length (s)
    #[arg(long, default_value_t = hppc::DEFAULT_CHARGE_PULSE.as_secs())]
    pub charge_pulse: u64,

    /// Pause after the charge pulse (s)
    #[arg(long, default_value_t = hppc::DEFAULT_CHARGE_PULSE_PAUSE.as_secs())]
    pub charge_pulse_pause: u64,

    /// Current of the state-of-charge step between cycles, negative (A)
    #[arg(long, allow_negative_numbers = true, default_value_t = hppc::DEFAULT_STEP_DISCHARGE_CURRENT)]
    pub step_discharge_current: f32,

    /// Length of the state-of-charge step (s)
    #[arg(long, default_value_t = hppc::DEFAULT_STEP_DISCHARGE.as_secs())]
    pub step_discharge: u64,

    /// Rest after each state-of-charge step (s)
    #[arg(long, default_value_t = hppc::DEFAULT_STEP_REST.as_secs())]
    pub step_rest: u64,

    /// Number of pulse sub-cycles
    #[arg(long, default_value_t = hppc::DEFAULT_CYCLES)]
    pub cycles: u16,
}

impl HppcArgs {
    #[must_use]
    pub fn params(&self) -> HppcParams {
        HppcParams {
            charge_voltage: self.charge.charge_voltage,
            charge_current: self.charge.charge_current,
            cutoff_current: self.charge.cutoff_current,
            charge_timeout: Duration::from_secs(self.charge.charge_timeout),
            cutoff_voltage: self.cutoff_voltage,
            initial_rest: Duration::from_secs(self.initial_rest),
            discharge_pulse_current: self.discharge_pulse_current,
            discharge_pulse: Duration::from_secs(self.discharge_pulse),
            discharge_pulse_pause: Duration::from_secs(self.discharge_pulse_pause),
            charge_pulse_current: self.charge_pulse_current,
            charge_pulse: Duration::from_secs(self.charge_pulse),
            charge_pulse_pause: Duration::from_secs(self.charge_pulse_pause),
            step_discharge_current: self.step_discharge_current,
            step_discharge: Duration::from_secs(self.step_discharge),
            step_rest: Duration::from_secs(self.step_rest),
            cycles: self.cycles,
        }
    }
}

#[derive(Debug, Args)]
pub struct IncrementalOcvArgs {
    #[command(flatten)]
    pub charge: ChargeArgs,

    /// Rest after the initial charge (s)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_INITIAL_REST.as_secs())]
    pub initial_rest: u64,

    /// Discharge walk stops once the voltage drops below this (V)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_LOWER_THRESHOLD)]
    pub lower_threshold: f32,

    /// Current of each discharge increment, negative (A)
    #[arg(long, allow_negative_numbers = true, default_value_t = incremental_ocv::DEFAULT_DISCHARGE_CURRENT)]
    pub discharge_current: f32,

    /// Length of each discharge increment (s)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_DISCHARGE_STEP.as_secs())]
    pub discharge_step: u64,

    /// Relaxation wait after each discharge increment (s)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_DISCHARGE_WAIT.as_secs())]
    pub discharge_wait: u64,

    /// Charge walk stops once the voltage rises above this (V)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_UPPER_THRESHOLD)]
    pub upper_threshold: f32,

    /// Current of each charge increment (A)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_STEP_CHARGE_CURRENT)]
    pub step_charge_current: f32,

    /// Length of each charge increment (s)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_CHARGE_STEP.as_secs())]
    pub charge_step: u64,

    /// Relaxation wait after each charge increment (s)
    #[arg(long, default_value_t = incremental_ocv::DEFAULT_CHARGE_WAIT.as_secs())]
    pub charge_wait: u64,
}

impl IncrementalOcvArgs {
    #[must_use]
    pub fn params(&self) -> IncrementalOcvParams {
        IncrementalOcvParams {
            charge_voltage: self.charge.charge_voltage,
            charge_current: self.charge.charge_current,
            cutoff_current: self.charge.cutoff_current,
            charge_timeout: Duration::from_secs(self.charge.charge_timeout),
            initial_rest: Duration::from_secs(self.initial_rest),
            lower_threshold: self.lower_threshold,
            discharge_current: self.discharge_current,
            discharge_step: Duration::from_secs(self.discharge_step),
            discharge_wait: Duration::from_secs(self.discharge_wait),
            upper_threshold: self.upper_threshold,
            step_charge_current: self.step_charge_current,
            charge_step: Duration::from_secs(self.charge_step),
            charge_wait: Duration::from_secs(self.charge_wait),
        }
    }
}

#[derive(Debug, Args)]
pub struct PseudoOcvArgs {
    #[command(flatten)]
    pub charge: ChargeArgs,

    /// Rest after the initial charge (s)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_INITIAL_REST.as_secs())]
    pub initial_rest: u64,

    /// Sweep discharge ends below this voltage (V)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_LOWER_VOLTAGE)]
    pub lower_voltage: f32,

    /// Sweep discharge current, negative (A)
    #[arg(long, allow_negative_numbers = true, default_value_t = pseudo_ocv::DEFAULT_SWEEP_DISCHARGE_CURRENT)]
    pub sweep_discharge_current: f32,

    /// Sweep discharge timeout (s)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_SWEEP_DISCHARGE_TIMEOUT.as_secs())]
    pub sweep_discharge_timeout: u64,

    /// Sweep charge ends above this voltage (V)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_UPPER_VOLTAGE)]
    pub upper_voltage: f32,

    /// Sweep charge current (A)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_SWEEP_CHARGE_CURRENT)]
    pub sweep_charge_current: f32,

    /// Sweep charge timeout (s)
    #[arg(long, default_value_t = pseudo_ocv::DEFAULT_SWEEP_CHARGE_TIMEOUT.as_secs())]
    pub sweep_charge_timeout: u64,
}

impl PseudoOcvArgs {
    #[must_use]
    pub fn params(&self) -> PseudoOcvParams {
        PseudoOcvParams {
            charge_voltage: self.charge.charge_voltage,
            charge_current: self.charge.charge_current,
            cutoff_current: self.charge.cutoff_current,
            charge_timeout: Duration::from_secs(self.charge.charge_timeout),
            initial_rest: Duration::from_secs(self.initial_rest),
            lower_voltage: self.lower_voltage,
            sweep_discharge_current: self.sweep_discharge_current,
            sweep_discharge_timeout: Duration::from_secs(self.sweep_discharge_timeout),
            upper_voltage: self.upper_voltage,
            sweep_charge_current: self.sweep_charge_current,
            sweep_charge_timeout: Duration::from_secs(self.sweep_charge_timeout),
        }
    }
}
