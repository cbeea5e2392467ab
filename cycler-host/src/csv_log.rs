//! Append-only CSV record of every telemetry line received during a run.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Header written at the start of every run, even when appending.
pub const LOG_HEADER: &str = "step,mode,time,voltage,current";

pub struct LogWriter<W: Write> {
    writer: W,
    records: usize,
}

impl LogWriter<BufWriter<File>> {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn append(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> io::Result<Self> {
        let mut log = Self {
            writer,
            records: 0,
        };
        log.write_header()?;
        Ok(log)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "{LOG_HEADER}")?;
        self.writer.flush()
    }

    /// Writes `<step>,<raw line>` and flushes so a crash loses at most one line.
    pub fn record(&mut self, step: usize, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{step},{line}")?;
        self.records += 1;
        self.writer.flush()
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}
