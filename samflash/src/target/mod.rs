//! Target chip support.
//!
//! [`chip`] holds the profile registry keyed by CHIPID; [`eefc`] drives the
//! embedded flash controller those profiles describe.

pub mod chip;
pub mod eefc;

pub use chip::{AssistLayout, ChipFamily, ChipProfile, PagePlacement, SAM3X_ASSIST, WriteStrategy};
pub use eefc::{EefcFlash, FlashState, PollConfig, ProgramOptions};
