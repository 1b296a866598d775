//! Enhanced embedded flash controller (EEFC).

pub mod flasher;
pub mod registers;

pub use flasher::{EefcFlash, FlashState, PollConfig, ProgramOptions};
pub use registers::{EefcCommand, PlaneRegisters};
