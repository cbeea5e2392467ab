//! Instrument session over a byte-oriented link.
//!
//! The session owns the transport, assembles telemetry lines, remembers the
//! last raw line and decoded sample, and makes sure the instrument is told to
//! go idle before the session goes away. Hosts implement [`InstrumentLink`]
//! for whatever carries the bytes (serial port, socket, test double).

use core::fmt;

use crate::operation::OperationKind;
use crate::telemetry::{
    FrameError, LineAssembler, OperatingMode, TelemetryLine, TelemetrySample, decode,
};

/// Blocking byte transport to the instrument.
pub trait InstrumentLink {
    type Error;

    /// Writes the whole buffer or fails.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Blocks until one byte is available.
    fn read_byte(&mut self) -> Result<u8, Self::Error>;
}

/// Failures surfaced by [`InstrumentSession`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionError<E> {
    /// A line arrived but could not be decoded; the channel is still usable.
    Malformed(FrameError),
    /// A command could not be encoded.
    Command(FrameError),
    /// The session was already closed.
    Closed,
    /// The transport failed.
    Channel(E),
}

impl<E: fmt::Display> fmt::Display for SessionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Malformed(err) => write!(f, "malformed telemetry: {err}"),
            SessionError::Command(err) => write!(f, "invalid command: {err}"),
            SessionError::Closed => f.write_str("session closed"),
            SessionError::Channel(err) => write!(f, "channel fault: {err}"),
        }
    }
}

pub struct InstrumentSession<L>
where
    L: InstrumentLink,
{
    link: L,
    assembler: LineAssembler,
    last_line: TelemetryLine,
    last_sample: Option<TelemetrySample>,
    commanded: Option<OperatingMode>,
    closed: bool,
}

impl<L> InstrumentSession<L>
where
    L: InstrumentLink,
{
    #[must_use]
    pub fn new(link: L) -> Self {
        Self {
            link,
            assembler: LineAssembler::new(),
            last_line: TelemetryLine::new(),
            last_sample: None,
            commanded: None,
            closed: false,
        }
    }

    /// Encodes and writes the command for `kind`.
    ///
    /// The instrument switches modes on its own schedule; callers must not
    /// assume the next sample already reflects the new mode.
    pub fn send_operation(&mut self, kind: &OperationKind) -> Result<(), SessionError<L::Error>> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let frame = kind.encode().map_err(SessionError::Command)?;
        self.link
            .write_all(frame.as_bytes())
            .map_err(SessionError::Channel)?;
        self.commanded = Some(kind.mode());
        Ok(())
    }

    /// Blocks until the next complete line, then decodes it.
    ///
    /// The raw line is retained even when decoding fails so it can still be
    /// logged (lossily, if it was not UTF-8 or too long); the last good sample
    /// is only replaced on success.
    pub fn next_sample(&mut self) -> Result<TelemetrySample, SessionError<L::Error>> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        loop {
            let byte = self.link.read_byte().map_err(SessionError::Channel)?;
            if !self.assembler.push(byte) {
                continue;
            }

            self.assembler
                .take_line(&mut self.last_line)
                .map_err(SessionError::Malformed)?;
            let sample = decode(&self.last_line).map_err(SessionError::Malformed)?;
            self.last_sample = Some(sample);
            return Ok(sample);
        }
    }

    /// Most recent successfully decoded sample.
    #[must_use]
    pub const fn last_sample(&self) -> Option<&TelemetrySample> {
        self.last_sample.as_ref()
    }

    /// Most recent complete line, without its terminator.
    #[must_use]
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    /// Mode of the last command written, if any.
    #[must_use]
    pub const fn commanded_mode(&self) -> Option<OperatingMode> {
        self.commanded
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Commands idle unless idle was the last command, then refuses further I/O.
    pub fn close(&mut self) -> Result<(), L::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.commanded == Some(OperatingMode::Idle) {
            return Ok(());
        }
        self.write_idle()
    }

    /// Single best-effort idle command after a channel fault; errors are ignored.
    pub fn fail_safe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.write_idle();
    }

    fn write_idle(&mut self) -> Result<(), L::Error> {
        // Idle has no setpoints, so encoding cannot fail.
        if let Ok(frame) = OperationKind::Idle.encode() {
            self.link.write_all(frame.as_bytes())?;
            self.commanded = Some(OperatingMode::Idle);
        }
        Ok(())
    }
}

impl<L> Drop for InstrumentSession<L>
where
    L: InstrumentLink,
{
    fn drop(&mut self) {
        let _ = self.close();
    }
}
