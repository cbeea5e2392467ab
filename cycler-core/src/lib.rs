#![no_std]

// Shared logic for driving the battery cycler instrument.
//
// Nothing here needs `std`. Transports and clocks come from the host through
// small traits; the codec, completion rules and step programs live here.

pub mod experiment;
pub mod instrument;
pub mod operation;
pub mod sequencer;
pub mod sequences;
pub mod telemetry;
