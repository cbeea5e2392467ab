//! Telemetry frame codec shared by the session and host tooling.
//!
//! The instrument streams one comma-separated line per sample
//! (`<mode>,<elapsed_ms>,<voltage>,<current>\r\n`) and accepts one
//! space-separated command line per operation
//! (`<mode> <setpoint_a> <setpoint_b> <setpoint_c>\n`). Both directions stay
//! `no_std`: decoded samples are plain `Copy` values and encoded commands live in
//! fixed-capacity buffers.

use core::fmt::{self, Write as _};

use heapless::{String, Vec};
use winnow::ascii::{dec_uint, float};
use winnow::error::ContextError;
use winnow::prelude::*;

/// Longest telemetry line retained by the session, excluding the terminator.
pub const TELEMETRY_LINE_CAPACITY: usize = 96;

/// Capacity of an encoded command; large enough for any three finite `f32` setpoints.
pub const COMMAND_FRAME_CAPACITY: usize = 160;

/// Number of comma-separated fields in a telemetry line.
pub const TELEMETRY_FIELD_COUNT: usize = 4;

/// Decimal places used when rendering setpoints on the wire.
const SETPOINT_PRECISION: usize = 4;

/// Smallest non-zero setpoint magnitude that survives rendering; anything
/// smaller goes out as zero.
pub const SETPOINT_RESOLUTION: f32 = 0.000_05;

/// Raw telemetry line as received, stripped of CR/LF.
pub type TelemetryLine = String<TELEMETRY_LINE_CAPACITY>;

/// Encoded command ready to be written to the instrument.
pub type CommandFrame = String<COMMAND_FRAME_CAPACITY>;

/// Firmware control states reported by and commanded on the instrument.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperatingMode {
    Idle,
    ConstantCurrentConstantVoltage,
    CurrentPulse,
    RegulatedCurrent,
}

impl OperatingMode {
    /// Wire code used in both telemetry and command frames.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            OperatingMode::Idle => 0,
            OperatingMode::ConstantCurrentConstantVoltage => 1,
            OperatingMode::CurrentPulse => 2,
            OperatingMode::RegulatedCurrent => 3,
        }
    }

    /// Attempts to construct a mode from its wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperatingMode::Idle),
            1 => Some(OperatingMode::ConstantCurrentConstantVoltage),
            2 => Some(OperatingMode::CurrentPulse),
            3 => Some(OperatingMode::RegulatedCurrent),
            _ => None,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Idle => f.write_str("idle"),
            OperatingMode::ConstantCurrentConstantVoltage => f.write_str("cccv"),
            OperatingMode::CurrentPulse => f.write_str("pulse"),
            OperatingMode::RegulatedCurrent => f.write_str("regulated"),
        }
    }
}

/// One decoded telemetry sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetrySample {
    pub mode: OperatingMode,
    pub elapsed_ms: u64,
    pub voltage: f32,
    pub current: f32,
}

impl TelemetrySample {
    #[must_use]
    pub const fn new(mode: OperatingMode, elapsed_ms: u64, voltage: f32, current: f32) -> Self {
        Self {
            mode,
            elapsed_ms,
            voltage,
            current,
        }
    }
}

/// Telemetry fields, in wire order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameField {
    Mode,
    Elapsed,
    Voltage,
    Current,
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameField::Mode => f.write_str("mode"),
            FrameField::Elapsed => f.write_str("time"),
            FrameField::Voltage => f.write_str("voltage"),
            FrameField::Current => f.write_str("current"),
        }
    }
}

/// Reasons a frame could not be decoded or encoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// The line did not split into exactly four fields.
    FieldCount(usize),
    /// A field failed numeric conversion.
    InvalidField(FrameField),
    /// The mode field is numeric but names no known mode.
    UnknownMode(u8),
    /// The line exceeded [`TELEMETRY_LINE_CAPACITY`] before its terminator.
    LineOverflow,
    /// The line contained bytes that are not UTF-8.
    NotUtf8,
    /// A command setpoint was NaN or infinite.
    NonFiniteSetpoint,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::FieldCount(count) => {
                write!(f, "expected {TELEMETRY_FIELD_COUNT} fields, found {count}")
            }
            FrameError::InvalidField(field) => write!(f, "invalid {field} field"),
            FrameError::UnknownMode(code) => write!(f, "unknown mode code {code}"),
            FrameError::LineOverflow => f.write_str("line exceeds buffer capacity"),
            FrameError::NotUtf8 => f.write_str("line is not valid UTF-8"),
            FrameError::NonFiniteSetpoint => f.write_str("setpoint is not finite"),
        }
    }
}

impl core::error::Error for FrameError {}

/// Decodes one telemetry line into a sample.
///
/// Trailing CR/LF is ignored. Any other deviation from the four-field format is
/// reported as a [`FrameError`]; callers treat that as "no new information".
pub fn decode(line: &str) -> Result<TelemetrySample, FrameError> {
    let fields = split_fields(line.trim_end_matches(['\r', '\n']))?;

    let code = parse_field(dec_uint::<_, u8, _>, fields[0], FrameField::Mode)?;
    let mode = OperatingMode::from_code(code).ok_or(FrameError::UnknownMode(code))?;
    let elapsed_ms = parse_field(dec_uint::<_, u64, _>, fields[1], FrameField::Elapsed)?;
    let voltage = parse_field(float::<_, f32, _>, fields[2], FrameField::Voltage)?;
    let current = parse_field(float::<_, f32, _>, fields[3], FrameField::Current)?;

    Ok(TelemetrySample::new(mode, elapsed_ms, voltage, current))
}

/// Renders a command line for the instrument.
///
/// Setpoints are written with fixed precision so the firmware's float parser
/// never sees exponent notation.
pub fn encode(
    mode: OperatingMode,
    setpoint_a: f32,
    setpoint_b: f32,
    setpoint_c: f32,
) -> Result<CommandFrame, FrameError> {
    if !(setpoint_a.is_finite() && setpoint_b.is_finite() && setpoint_c.is_finite()) {
        return Err(FrameError::NonFiniteSetpoint);
    }

    let mut frame = CommandFrame::new();
    writeln!(
        frame,
        "{} {:.prec$} {:.prec$} {:.prec$}",
        mode.code(),
        setpoint_a,
        setpoint_b,
        setpoint_c,
        prec = SETPOINT_PRECISION,
    )
    .map_err(|_| FrameError::NonFiniteSetpoint)?;

    Ok(frame)
}

fn split_fields(line: &str) -> Result<[&str; TELEMETRY_FIELD_COUNT], FrameError> {
    let mut fields = [""; TELEMETRY_FIELD_COUNT];
    let mut count = 0;
    for field in line.split(',') {
        if let Some(slot) = fields.get_mut(count) {
            *slot = field;
        }
        count += 1;
    }

    if count == TELEMETRY_FIELD_COUNT {
        Ok(fields)
    } else {
        Err(FrameError::FieldCount(count))
    }
}

fn parse_field<'i, O, P>(mut parser: P, text: &'i str, field: FrameField) -> Result<O, FrameError>
where
    P: Parser<&'i str, O, ContextError>,
{
    parser
        .parse(text)
        .map_err(|_| FrameError::InvalidField(field))
}

/// Accumulates link bytes into complete telemetry lines.
///
/// Carriage returns are dropped; a line feed completes the line. Lines longer
/// than [`TELEMETRY_LINE_CAPACITY`] are cut at capacity and reported once.
#[derive(Clone, Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8, TELEMETRY_LINE_CAPACITY>,
    overflowed: bool,
}

impl LineAssembler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte; returns `true` when a line terminator was seen.
    pub fn push(&mut self, byte: u8) -> bool {
        match byte {
            b'\n' => true,
            b'\r' => false,
            other => {
                if self.buffer.push(other).is_err() {
                    self.overflowed = true;
                }
                false
            }
        }
    }

    /// Moves the completed line into `line` and resets the assembler.
    ///
    /// `line` is filled even on error: invalid UTF-8 becomes U+FFFD and an
    /// overlong line keeps its first [`TELEMETRY_LINE_CAPACITY`] bytes.
    pub fn take_line(&mut self, line: &mut TelemetryLine) -> Result<(), FrameError> {
        let bytes = core::mem::take(&mut self.buffer);
        let overflowed = core::mem::take(&mut self.overflowed);
        let valid = fill_lossy(line, &bytes);

        if overflowed {
            Err(FrameError::LineOverflow)
        } else if valid {
            Ok(())
        } else {
            Err(FrameError::NotUtf8)
        }
    }

    /// Number of bytes buffered for the current line.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` when no bytes of the current line are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Copies `bytes` into `line`, replacing invalid sequences. Returns `false`
/// if any replacement was needed. Stops quietly when `line` is full.
fn fill_lossy(line: &mut TelemetryLine, bytes: &[u8]) -> bool {
    line.clear();
    let mut valid = true;
    for chunk in bytes.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if line.push(ch).is_err() {
                return valid;
            }
        }
        if !chunk.invalid().is_empty() {
            valid = false;
            if line.push(char::REPLACEMENT_CHARACTER).is_err() {
                return valid;
            }
        }
    }
    valid
}

#[cfg(test)]
mod tests {
    use core::fmt::Write as _;

    use super::*;

    fn approx(left: f32, right: f32) -> bool {
        let delta = left - right;
        delta < 1e-6 && delta > -1e-6
    }

    #[test]
    fn decodes_instrument_line() {
        let sample = decode("1,123456,4.0512,0.7480\r\n").unwrap();
        assert_eq!(sample.mode, OperatingMode::ConstantCurrentConstantVoltage);
        assert_eq!(sample.elapsed_ms, 123_456);
        assert!(approx(sample.voltage, 4.0512));
        assert!(approx(sample.current, 0.748));
    }

    #[test]
    fn decodes_negative_current() {
        let sample = decode("3,10,3.70,-0.75").unwrap();
        assert_eq!(sample.mode, OperatingMode::RegulatedCurrent);
        assert!(approx(sample.current, -0.75));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(decode("1,2,3"), Err(FrameError::FieldCount(3)));
        assert_eq!(decode("1,2,3,4,5,6"), Err(FrameError::FieldCount(6)));
        assert_eq!(decode(""), Err(FrameError::FieldCount(1)));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        assert_eq!(
            decode("x,2,3.0,4.0"),
            Err(FrameError::InvalidField(FrameField::Mode))
        );
        assert_eq!(
            decode("1,-2,3.0,4.0"),
            Err(FrameError::InvalidField(FrameField::Elapsed))
        );
        assert_eq!(
            decode("1,2,volts,4.0"),
            Err(FrameError::InvalidField(FrameField::Voltage))
        );
        assert_eq!(
            decode("1,2,3.0,"),
            Err(FrameError::InvalidField(FrameField::Current))
        );
    }

    #[test]
    fn rejects_unknown_mode_code() {
        assert_eq!(decode("7,2,3.0,4.0"), Err(FrameError::UnknownMode(7)));
    }

    #[test]
    fn encodes_cccv_command() {
        let frame = encode(OperatingMode::ConstantCurrentConstantVoltage, 4.1, 0.75, 0.075).unwrap();
        assert_eq!(frame.as_str(), "1 4.1000 0.7500 0.0750\n");
    }

    #[test]
    fn encodes_idle_and_regulated_commands() {
        let idle = encode(OperatingMode::Idle, 0.0, 0.0, 0.0).unwrap();
        assert_eq!(idle.as_str(), "0 0.0000 0.0000 0.0000\n");

        let discharge = encode(OperatingMode::RegulatedCurrent, 0.0, -0.75, 0.0).unwrap();
        assert_eq!(discharge.as_str(), "3 0.0000 -0.7500 0.0000\n");
    }

    #[test]
    fn encode_rejects_non_finite_setpoints() {
        assert_eq!(
            encode(OperatingMode::CurrentPulse, 0.0, f32::NAN, 0.0),
            Err(FrameError::NonFiniteSetpoint)
        );
    }

    #[test]
    fn extreme_finite_setpoints_fit_the_frame() {
        let frame = encode(OperatingMode::CurrentPulse, f32::MAX, f32::MIN, f32::MAX).unwrap();
        assert!(frame.ends_with('\n'));
    }

    #[test]
    fn assembler_splits_lines_and_drops_carriage_returns() {
        let mut assembler = LineAssembler::new();
        let mut completed = false;
        for byte in b"0,5,3.9,0.0\r\n" {
            completed = assembler.push(*byte);
        }
        assert!(completed);
        let mut line = TelemetryLine::new();
        assert_eq!(assembler.take_line(&mut line), Ok(()));
        assert_eq!(line.as_str(), "0,5,3.9,0.0");
        assert!(assembler.is_empty());
    }

    #[test]
    fn assembler_reports_overflow_once() {
        let mut assembler = LineAssembler::new();
        for _ in 0..=TELEMETRY_LINE_CAPACITY {
            assembler.push(b'9');
        }
        assert!(assembler.push(b'\n'));
        let mut line = TelemetryLine::new();
        assert_eq!(assembler.take_line(&mut line), Err(FrameError::LineOverflow));
        assert_eq!(line.len(), TELEMETRY_LINE_CAPACITY);
        assert!(line.bytes().all(|byte| byte == b'9'));

        for byte in b"0,1,2.0,0.0" {
            assembler.push(*byte);
        }
        assembler.push(b'\n');
        assert_eq!(assembler.take_line(&mut line), Ok(()));
        assert_eq!(line.as_str(), "0,1,2.0,0.0");
    }

    #[test]
    fn assembler_rejects_invalid_utf8() {
        let mut assembler = LineAssembler::new();
        for byte in b"0,1,\xFF3.7,0.0\n" {
            assembler.push(*byte);
        }
        let mut line = TelemetryLine::new();
        assert_eq!(assembler.take_line(&mut line), Err(FrameError::NotUtf8));
        assert_eq!(line.as_str(), "0,1,\u{FFFD}3.7,0.0");
    }

    #[test]
    fn wire_rendered_fields_decode_exactly() {
        let modes = [
            OperatingMode::Idle,
            OperatingMode::ConstantCurrentConstantVoltage,
            OperatingMode::CurrentPulse,
            OperatingMode::RegulatedCurrent,
        ];
        let elapsed = [0, 1, 999, 86_400_000, u64::MAX];
        let voltages = [0.0_f32, 4.1, 3.725_912_5, 0.000_000_1, 4_200_000.0, 1.5];
        let currents = [0.0_f32, -0.75, -3.0, 0.075, 12.345_678, -0.000_123_4];

        for mode in modes {
            for ms in elapsed {
                for (&voltage, &current) in voltages.iter().zip(currents.iter()) {
                    let mut line: String<128> = String::new();
                    write!(line, "{},{ms},{voltage},{current}\r\n", mode.code()).unwrap();

                    let sample = decode(&line).unwrap();
                    assert_eq!(sample.mode, mode);
                    assert_eq!(sample.elapsed_ms, ms);
                    assert_eq!(sample.voltage.to_bits(), voltage.to_bits(), "{line}");
                    assert_eq!(sample.current.to_bits(), current.to_bits(), "{line}");
                }
            }
        }
    }
}
