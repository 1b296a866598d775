//! # samflash
//!
//! A library for programming Microchip SAM microcontrollers through the
//! SAM-BA boot monitor.
//!
//! This crate provides:
//!
//! - SAM-BA command encoding and reply matching
//! - A blocking bootloader session over any serial [`Port`]
//! - A chip profile registry keyed by CHIPID
//! - An EEFC flash controller: erase, page write, verify, boot select, reset
//!
//! ## Supported Chips
//!
//! - ATSAM3X8 (dual plane)
//! - ATSAME70 / ATSAMS70 / ATSAMV70 / ATSAMV71, 19, 20 and 21 variants
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::{EefcFlash, NativePort, ProgramOptions, SambaSession, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 921600))?;
//!     let mut session = SambaSession::new(port);
//!     session.initialize()?;
//!
//!     let mut flash = EefcFlash::from_session(&mut session)?;
//!     println!("{}", flash.profile());
//!
//!     flash.init()?;
//!     let image = std::fs::read("firmware.bin")?;
//!     flash.program(&image, ProgramOptions::default(), |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     flash.set_boot(true)?;
//!     flash.reset()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;

#[cfg(test)]
mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    cancel::CancelToken,
    error::{Error, Result},
    port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    protocol::{Command, ReadMode, Reply, RequestId, ResponseBuffer, ResponseQueue},
    session::{CHIPID_CIDR, JumpData, SambaSession},
    target::{
        AssistLayout, ChipFamily, ChipProfile, EefcFlash, FlashState, PagePlacement, PollConfig,
        ProgramOptions, SAM3X_ASSIST, WriteStrategy,
    },
};
