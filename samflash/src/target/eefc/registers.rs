//! EEFC and reset controller register definitions.
//!
//! ## FCR word layout
//!
//! ```text
//! +--------+------------------+--------+
//! | 31..24 |      23..8       |  7..0  |
//! +--------+------------------+--------+
//! |  0x5A  |  FARG (page/bit) |  FCMD  |
//! +--------+------------------+--------+
//! ```

/// Key that must accompany every FCR write.
pub const EEFC_KEY: u32 = 0x5A;

/// FSR: the controller is ready for a new command.
pub const FSR_FRDY: u32 = 1 << 0;

/// FSR: the last command was rejected.
pub const FSR_FCMDE: u32 = 1 << 1;

/// FMR flash wait state field position.
pub const FMR_FWS_SHIFT: u32 = 8;

/// Flash wait states required on SAM3 parts while programming.
pub const SAM3_FLASH_WAIT_STATES: u32 = 6;

/// Offset of RSTC_CR from the reset controller base.
pub const RSTC_CR_OFFSET: u32 = 0x00;

/// Key that must accompany every RSTC_CR write.
pub const RSTC_CR_KEY: u32 = 0xA5;

/// RSTC_CR: reset the processor.
pub const RSTC_CR_PROCRST: u32 = 1 << 0;

/// RSTC_CR: reset the peripherals.
pub const RSTC_CR_PERRST: u32 = 1 << 2;

/// GPNVM bit selecting boot from flash. Bit 0 is the security bit.
pub const GPNVM_BOOT_FROM_FLASH: u32 = 1;

/// Offset between the register blocks of consecutive planes.
const PLANE_STRIDE: u32 = 0x200;

/// EEFC command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EefcCommand {
    /// Get flash descriptor.
    GetDescriptor = 0x00,
    /// Write page.
    WritePage = 0x01,
    /// Write page and lock.
    WritePageLock = 0x02,
    /// Erase page and write page.
    EraseWritePage = 0x03,
    /// Erase page, write page and lock.
    EraseWritePageLock = 0x04,
    /// Erase all.
    EraseAll = 0x05,
    /// Set lock bit.
    SetLockBit = 0x08,
    /// Clear lock bit.
    ClearLockBit = 0x09,
    /// Get lock bit.
    GetLockBit = 0x0A,
    /// Set GPNVM bit.
    SetGpnvm = 0x0B,
    /// Clear GPNVM bit.
    ClearGpnvm = 0x0C,
    /// Get GPNVM bit.
    GetGpnvm = 0x0D,
}

impl EefcCommand {
    /// Decode a command code.
    #[cfg(test)]
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::GetDescriptor,
            0x01 => Self::WritePage,
            0x02 => Self::WritePageLock,
            0x03 => Self::EraseWritePage,
            0x04 => Self::EraseWritePageLock,
            0x05 => Self::EraseAll,
            0x08 => Self::SetLockBit,
            0x09 => Self::ClearLockBit,
            0x0A => Self::GetLockBit,
            0x0B => Self::SetGpnvm,
            0x0C => Self::ClearGpnvm,
            0x0D => Self::GetGpnvm,
            _ => return None,
        })
    }
}

/// Compose an FCR word.
pub fn fcr_word(command: EefcCommand, arg: u32) -> u32 {
    (EEFC_KEY << 24) | ((arg & 0xFFFF) << 8) | u32::from(command as u8)
}

/// Register addresses of one EEFC plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneRegisters {
    /// Flash mode register.
    pub fmr: u32,
    /// Flash command register.
    pub fcr: u32,
    /// Flash status register.
    pub fsr: u32,
    /// Flash result register.
    pub frr: u32,
}

impl PlaneRegisters {
    /// Registers of `plane` for a controller based at `base`.
    pub fn new(base: u32, plane: u32) -> Self {
        let base = base + PLANE_STRIDE * plane;
        Self {
            fmr: base,
            fcr: base + 0x04,
            fsr: base + 0x08,
            frr: base + 0x0C,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcr_word_layout() {
        assert_eq!(fcr_word(EefcCommand::EraseAll, 0), 0x5A00_0005);
        assert_eq!(fcr_word(EefcCommand::WritePage, 76), 0x5A00_4C01);
        assert_eq!(fcr_word(EefcCommand::SetGpnvm, GPNVM_BOOT_FROM_FLASH), 0x5A00_010B);
        assert_eq!(fcr_word(EefcCommand::EraseWritePage, 4095), 0x5A0F_FF03);
    }

    #[test]
    fn test_plane_registers() {
        let plane0 = PlaneRegisters::new(0x400E_0A00, 0);
        assert_eq!(plane0.fmr, 0x400E_0A00);
        assert_eq!(plane0.fcr, 0x400E_0A04);
        assert_eq!(plane0.fsr, 0x400E_0A08);
        assert_eq!(plane0.frr, 0x400E_0A0C);

        let plane1 = PlaneRegisters::new(0x400E_0A00, 1);
        assert_eq!(plane1.fcr, 0x400E_0C04);
        assert_eq!(plane1.fsr, 0x400E_0C08);
    }

    #[test]
    fn test_command_code_roundtrip() {
        for code in 0u8..=0x0F {
            if let Some(cmd) = EefcCommand::from_code(code) {
                assert_eq!(cmd as u8, code);
            }
        }
        assert_eq!(EefcCommand::from_code(0x06), None);
    }
}
