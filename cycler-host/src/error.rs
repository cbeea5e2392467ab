use std::io;

use cycler_core::experiment::ExperimentError;
use cycler_core::sequences::ProgramError;
use cycler_core::telemetry::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("log store error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid step program: {0}")]
    Program(#[from] ProgramError),

    #[error("instrument channel fault: {0}")]
    ChannelFault(io::Error),

    #[error("could not encode instrument command: {0}")]
    Command(FrameError),

    #[error("instrument session closed before the run finished")]
    Closed,
}

impl From<ExperimentError<io::Error>> for RunError {
    fn from(err: ExperimentError<io::Error>) -> Self {
        match err {
            ExperimentError::ChannelFault(err) => RunError::ChannelFault(err),
            ExperimentError::Command(err) => RunError::Command(err),
            ExperimentError::Closed => RunError::Closed,
        }
    }
}
