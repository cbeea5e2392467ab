//! Host side of the cycler: serial transport, CSV log, CLI and the run loop.

pub mod config;
pub mod csv_log;
pub mod error;
pub mod link;
pub mod runner;
