//! EEFC flash controller driven through a SAM-BA session.
//!
//! Every flash operation is a short sequence of register writes followed by
//! polling the flash status register (FSR) until the controller reports
//! ready. Page data reaches the flash latch either directly through word
//! writes ([`WriteStrategy::Direct`]) or through a small RAM routine that
//! copies a staged buffer into the latch ([`WriteStrategy::Assisted`]).
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
//!     let image = std::fs::read("firmware.bin")?;
//!     let mut flash = EefcFlash::from_session(&mut session)?;
//!     flash.init()?;
//!     flash.program(&image, ProgramOptions::default(), |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     flash.set_boot(true)?;
//!     flash.reset()?;
//!     Ok(())
//! }
//! ```

use log::{debug, info, trace};
use std::borrow::Cow;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::{CHIPID_CIDR, SambaSession};
use crate::target::chip::{AssistLayout, ChipProfile, WriteStrategy};
use crate::target::eefc::registers::{
    EefcCommand, FMR_FWS_SHIFT, FSR_FCMDE, FSR_FRDY, GPNVM_BOOT_FROM_FLASH, PlaneRegisters,
    RSTC_CR_OFFSET, SAM3_FLASH_WAIT_STATES, fcr_word,
};

/// Bounds on FSR polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum FSR reads per plane.
    pub max_attempts: u32,
    /// Deadline for each FSR read.
    pub read_timeout: Duration,
    /// Pause after a not-ready status.
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            read_timeout: Duration::from_millis(10),
            interval: Duration::from_millis(1),
        }
    }
}

/// What the controller is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashState {
    /// No operation in progress.
    #[default]
    Idle,
    /// Erasing all planes.
    Erasing,
    /// Writing a page.
    Writing,
    /// Reading back a page.
    Verifying,
    /// Waiting for FSR ready.
    Polling,
    /// Changing the boot source.
    SettingBoot,
    /// Issuing a reset.
    Resetting,
}

/// Options for [`EefcFlash::program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Erase all planes before writing.
    pub erase: bool,
    /// Read back every page after writing it.
    pub verify: bool,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            erase: true,
            verify: true,
        }
    }
}

/// Flash controller for one chip.
pub struct EefcFlash<'s, P: Port> {
    session: &'s mut SambaSession<P>,
    profile: ChipProfile,
    poll: PollConfig,
    cancel: CancelToken,
    state: FlashState,
    assist_loaded: bool,
    use_second_buffer: bool,
}

impl<'s, P: Port> EefcFlash<'s, P> {
    /// Create a controller for `profile`.
    pub fn new(session: &'s mut SambaSession<P>, profile: ChipProfile) -> Self {
        Self {
            session,
            profile,
            poll: PollConfig::default(),
            cancel: CancelToken::new(),
            state: FlashState::Idle,
            assist_loaded: false,
            use_second_buffer: false,
        }
    }

    /// Create a controller for a chip id from the registry.
    pub fn from_chip_id(session: &'s mut SambaSession<P>, chip_id: u32) -> Result<Self> {
        let profile = ChipProfile::from_chip_id(chip_id)?;
        Ok(Self::new(session, profile))
    }

    /// Create a controller for the chip the session is connected to.
    ///
    /// Uses the chip id from `initialize` when available, otherwise reads it.
    pub fn from_session(session: &'s mut SambaSession<P>) -> Result<Self> {
        let chip_id = match session.chip_id() {
            Some(id) => id,
            None => session.read_word(CHIPID_CIDR)?,
        };
        Self::from_chip_id(session, chip_id)
    }

    /// Use `cancel` to abort long operations.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the FSR polling bounds.
    #[must_use]
    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Chip profile in use.
    pub fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    /// Current controller state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// The session this controller drives.
    pub fn session(&self) -> &SambaSession<P> {
        self.session
    }

    /// Prepare the controller.
    ///
    /// Dual-plane SAM3 parts need extra flash wait states while programming.
    pub fn init(&mut self) -> Result<()> {
        if self.profile.planes < 2 {
            return Ok(());
        }
        let fmr = SAM3_FLASH_WAIT_STATES << FMR_FWS_SHIFT;
        for plane in 0..self.profile.planes {
            let regs = self.plane_registers(plane);
            debug!("Plane {plane}: FMR = {fmr:#010x}");
            self.session.write_word(regs.fmr, fmr)?;
        }
        Ok(())
    }

    /// Upload the RAM routine used by the assisted write strategy.
    pub fn load_assist_routine(&mut self, code: &[u8]) -> Result<()> {
        let layout = self.assist_layout().ok_or_else(|| {
            Error::Config(format!("{} uses direct page writes", self.profile.family))
        })?;
        if code.len() > layout.max_code_len as usize {
            return Err(Error::InvalidInput(format!(
                "assist routine is {} bytes, limit is {}",
                code.len(),
                layout.max_code_len
            )));
        }

        info!(
            "Loading assist routine ({} bytes) at {:#010x}",
            code.len(),
            layout.load_addr
        );
        self.session.write_bytes(layout.load_addr, code)?;
        self.session.set_jump_data(layout.stack_word, layout.jump_word);
        self.assist_loaded = true;
        Ok(())
    }

    /// Erase every plane.
    pub fn erase(&mut self) -> Result<()> {
        self.with_state(FlashState::Erasing, |flash| {
            info!("Erasing {} plane(s)", flash.profile.planes);
            flash.write_fcr(0, EefcCommand::EraseAll, 0)?;
            flash.wait_for_ready(0)?;

            if flash.profile.planes > 1 {
                flash.cancel.check()?;
                flash.write_fcr(1, EefcCommand::EraseAll, 0)?;
                flash.wait_for_ready(1)?;
            }
            debug!("Erase complete");
            Ok(())
        })
    }

    /// Write one page.
    ///
    /// `data` may be shorter than a page; the rest of the page is left as
    /// the latch holds it.
    pub fn write_page(&mut self, page: u32, data: &[u8]) -> Result<()> {
        self.check_page(page, data)?;
        self.with_state(FlashState::Writing, |flash| {
            let placement = flash.profile.placement(page);
            let addr = flash.profile.page_address(page);
            debug!(
                "Writing page {page} ({} bytes) at {addr:#010x} (plane {}, index {})",
                data.len(),
                placement.plane,
                placement.index
            );

            match flash.profile.strategy {
                WriteStrategy::Direct => {
                    flash.session.write_bytes(addr, data)?;
                    flash.write_fcr(placement.plane, EefcCommand::WritePage, placement.index)?;
                },
                WriteStrategy::Assisted(layout) => {
                    if !flash.assist_loaded {
                        return Err(Error::Config(
                            "assist routine must be loaded before writing pages".to_string(),
                        ));
                    }
                    let buffer = if flash.use_second_buffer {
                        layout.buffer1
                    } else {
                        layout.buffer0
                    };
                    flash.use_second_buffer = !flash.use_second_buffer;

                    flash.session.write_bytes(buffer, data)?;
                    flash.session.write_word(layout.copy_from_ptr, buffer)?;
                    flash.session.write_word(layout.copy_to_ptr, addr)?;
                    flash
                        .session
                        .write_word(layout.copy_length, data.len() as u32)?;
                    flash.wait_for_ready(0)?;
                    flash.session.go(layout.entry)?;
                    flash.write_fcr(
                        placement.plane,
                        EefcCommand::EraseWritePage,
                        placement.index,
                    )?;
                },
            }
            flash.wait_for_ready(placement.plane)
        })
    }

    /// Compare one page with `data`.
    pub fn verify_page(&mut self, page: u32, data: &[u8]) -> Result<bool> {
        self.check_page(page, data)?;
        self.with_state(FlashState::Verifying, |flash| {
            let addr = flash.profile.page_address(page);
            flash.session.verify_bytes(addr, data)
        })
    }

    /// Select the boot source: flash when `to_flash`, otherwise the ROM.
    pub fn set_boot(&mut self, to_flash: bool) -> Result<()> {
        self.with_state(FlashState::SettingBoot, |flash| {
            let command = if to_flash {
                EefcCommand::SetGpnvm
            } else {
                EefcCommand::ClearGpnvm
            };
            info!("Boot from {}", if to_flash { "flash" } else { "ROM" });
            flash.wait_for_ready(0)?;
            flash.write_fcr(0, command, GPNVM_BOOT_FROM_FLASH)?;
            flash.wait_for_ready(0)
        })
    }

    /// Reset the processor.
    pub fn reset(&mut self) -> Result<()> {
        self.with_state(FlashState::Resetting, |flash| {
            info!("Resetting device");
            let rstc_cr = flash.profile.rstc_base + RSTC_CR_OFFSET;
            flash
                .session
                .write_word(rstc_cr, flash.profile.reset_command)
        })
    }

    /// Wait until `plane` and every plane after it report ready.
    pub fn wait_for_ready(&mut self, plane: u32) -> Result<()> {
        if plane >= self.profile.planes {
            return Err(Error::InvalidInput(format!(
                "plane {plane} out of range ({} planes)",
                self.profile.planes
            )));
        }

        self.with_state(FlashState::Polling, |flash| {
            for plane in plane..flash.profile.planes {
                flash.poll_plane(plane)?;
            }
            Ok(())
        })
    }

    /// Issue an EEFC command on `plane`.
    pub fn write_fcr(&mut self, plane: u32, command: EefcCommand, arg: u32) -> Result<()> {
        let regs = self.plane_registers(plane);
        let word = fcr_word(command, arg);
        trace!("FCR{plane} <- {word:#010x} ({command:?} {arg})");
        self.session.write_word(regs.fcr, word)
    }

    /// Write a whole image starting at the first page.
    ///
    /// `progress` receives `(bytes_written, total_bytes)` after every page.
    /// The final partial page is padded with `0xFF`.
    pub fn program<F>(
        &mut self,
        image: &[u8],
        options: ProgramOptions,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let flash_size = self.profile.flash_size() as usize;
        if image.len() > flash_size {
            return Err(Error::InvalidInput(format!(
                "image is {} bytes, flash is {flash_size} bytes",
                image.len()
            )));
        }

        let page_size = self.profile.page_size as usize;
        let total = image.len();
        info!(
            "Programming {total} bytes ({} pages) into {}",
            total.div_ceil(page_size),
            self.profile.family
        );

        if options.erase {
            self.erase()?;
        }

        let mut written = 0;
        for (page, chunk) in (0u32..).zip(image.chunks(page_size)) {
            self.cancel.check()?;

            let data: Cow<'_, [u8]> = if chunk.len() == page_size {
                Cow::Borrowed(chunk)
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(page_size, 0xFF);
                Cow::Owned(padded)
            };

            self.write_page(page, &data)?;
            if options.verify && !self.verify_page(page, &data)? {
                return Err(Error::VerifyFailed { page });
            }

            written += chunk.len();
            progress(written, total);
        }

        info!("Programmed {written} bytes");
        Ok(())
    }

    fn poll_plane(&mut self, plane: u32) -> Result<()> {
        let fsr = self.plane_registers(plane).fsr;
        let mut attempts = 0;
        loop {
            self.cancel.check()?;
            if attempts >= self.poll.max_attempts {
                return Err(Error::NotReady { plane, attempts });
            }
            attempts += 1;

            let status = match self
                .session
                .read_word_with_timeout(fsr, self.poll.read_timeout)
            {
                Ok(status) => status,
                Err(e) if e.is_timeout() => {
                    debug!("FSR{plane} read timed out (attempt {attempts})");
                    continue;
                },
                Err(e) => return Err(e),
            };
            trace!("FSR{plane} = {status:#010x}");

            if status & FSR_FCMDE != 0 {
                return Err(Error::Controller { plane, status });
            }
            if status & FSR_FRDY != 0 {
                return Ok(());
            }
            thread::sleep(self.poll.interval);
        }
    }

    fn check_page(&self, page: u32, data: &[u8]) -> Result<()> {
        if page >= self.profile.page_count {
            return Err(Error::InvalidInput(format!(
                "page {page} out of range ({} pages)",
                self.profile.page_count
            )));
        }
        if data.len() > self.profile.page_size as usize {
            return Err(Error::InvalidInput(format!(
                "{} bytes do not fit a {} byte page",
                data.len(),
                self.profile.page_size
            )));
        }
        Ok(())
    }

    fn assist_layout(&self) -> Option<AssistLayout> {
        match self.profile.strategy {
            WriteStrategy::Assisted(layout) => Some(layout),
            WriteStrategy::Direct => None,
        }
    }

    fn plane_registers(&self, plane: u32) -> PlaneRegisters {
        PlaneRegisters::new(self.profile.eefc_base, plane)
    }

    fn with_state<T>(
        &mut self,
        state: FlashState,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = std::mem::replace(&mut self.state, state);
        let result = op(self);
        self.state = previous;
        result
    }
}
