//! Serial transport for the instrument session.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cycler_core::instrument::InstrumentLink;
use serialport::SerialPort;

/// How long a single port read may block before the abort flag is polled.
pub const READ_POLL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 64;

/// Opens the instrument port with the polling read timeout.
pub fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, serialport::Error> {
    serialport::new(path, baud).timeout(READ_POLL).open()
}

/// Buffered byte link over any blocking reader/writer.
///
/// Read timeouts are retried indefinitely: the instrument is expected to
/// stream samples, and a stalled channel simply stalls the run. The only way
/// out of a stalled read is the abort flag.
pub struct SerialLink<P> {
    port: P,
    buffer: [u8; READ_CHUNK],
    start: usize,
    end: usize,
    abort: Option<Arc<AtomicBool>>,
}

impl<P> SerialLink<P>
where
    P: Read + Write,
{
    #[must_use]
    pub fn new(port: P) -> Self {
        Self {
            port,
            buffer: [0; READ_CHUNK],
            start: 0,
            end: 0,
            abort: None,
        }
    }

    /// Makes blocked reads give up with [`ErrorKind::Interrupted`] once `flag` is set.
    #[must_use]
    pub fn with_abort(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    #[must_use]
    pub fn get_ref(&self) -> &P {
        &self.port
    }

    fn aborted(&self) -> bool {
        self.abort
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl<P> InstrumentLink for SerialLink<P>
where
    P: Read + Write,
{
    type Error = io::Error;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        while self.start == self.end {
            match self.port.read(&mut self.buffer) {
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(count) => {
                    self.start = 0;
                    self.end = count;
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    if self.aborted() {
                        return Err(io::Error::new(ErrorKind::Interrupted, "operator abort"));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let byte = self.buffer[self.start];
        self.start += 1;
        Ok(byte)
    }
}
