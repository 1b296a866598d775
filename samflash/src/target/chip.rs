//! Chip profiles for the SAM parts reachable through SAM-BA.
//!
//! Each supported part is described by a [`ChipProfile`]: flash geometry,
//! register bases and the write strategy the flash controller should use.
//! Profiles are looked up by the CHIPID register value the boot ROM reports.

use std::fmt;

use crate::error::{Error, Result};
use crate::target::eefc::registers::{RSTC_CR_KEY, RSTC_CR_PERRST, RSTC_CR_PROCRST};

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChipFamily {
    /// SAM3X8 (C/E/H), 512 KiB in two planes.
    Sam3x8,
    /// SAM E70/S70/V70/V71 with 512 KiB flash.
    Samx7x19,
    /// SAM E70/S70/V70/V71 with 1 MiB flash.
    Samx7x20,
    /// SAM E70/S70/V71 with 2 MiB flash.
    Samx7x21,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sam3x8 => write!(f, "ATSAM3X8"),
            Self::Samx7x19 => write!(f, "ATSAM(SEV)70x19"),
            Self::Samx7x20 => write!(f, "ATSAM(SEV)70x20"),
            Self::Samx7x21 => write!(f, "ATSAM(SEV)70x21"),
        }
    }
}

/// RAM layout of the flash assist routine.
///
/// The routine copies `copy_length` bytes from `copy_from_ptr` to
/// `copy_to_ptr` (the page latch) and returns to the boot ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AssistLayout {
    /// Where the routine code is uploaded.
    pub load_addr: u32,
    /// Maximum code size that fits below the parameter block.
    pub max_code_len: u32,
    /// Entry point passed to `go`.
    pub entry: u32,
    /// Word holding the source buffer address.
    pub copy_from_ptr: u32,
    /// Word holding the destination flash address.
    pub copy_to_ptr: u32,
    /// Word holding the number of bytes to copy.
    pub copy_length: u32,
    /// Scratch word receiving the jump target.
    pub jump_word: u32,
    /// Scratch word receiving the Thumb entry address.
    pub stack_word: u32,
    /// First page buffer.
    pub buffer0: u32,
    /// Second page buffer.
    pub buffer1: u32,
}

/// Assist routine layout for SAM3X8, placed at the start of the `user` area.
pub const SAM3X_ASSIST: AssistLayout = AssistLayout {
    load_addr: 0x2000_1000,
    max_code_len: 0x100,
    entry: 0x2000_1000,
    copy_from_ptr: 0x2000_1100,
    copy_to_ptr: 0x2000_1104,
    copy_length: 0x2000_1108,
    jump_word: 0x2000_110C,
    stack_word: 0x2000_1110,
    buffer0: 0x2000_1200,
    buffer1: 0x2000_1300,
};

/// How page data reaches the flash controller's latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum WriteStrategy {
    /// Word writes straight to the page address, then write-page.
    #[default]
    Direct,
    /// Stage the page in RAM and let an uploaded routine copy it.
    Assisted(AssistLayout),
}

/// Where a page lives inside the flash controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlacement {
    /// Plane (EEFC instance) owning the page.
    pub plane: u32,
    /// Page index within that plane.
    pub index: u32,
}

/// Flash geometry and register layout of one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChipProfile {
    /// Chip family.
    pub family: ChipFamily,
    /// Address of the first flash page.
    pub flash_base: u32,
    /// Total number of pages across all planes.
    pub page_count: u32,
    /// Page size in bytes.
    pub page_size: u32,
    /// Number of flash planes (1 or 2).
    pub planes: u32,
    /// Number of lock regions.
    pub lock_regions: u32,
    /// Start of RAM available to uploaded code.
    pub user: u32,
    /// Initial stack pointer for uploaded code.
    pub stack: u32,
    /// EEFC register base.
    pub eefc_base: u32,
    /// Reset controller register base.
    pub rstc_base: u32,
    /// Word written to RSTC_CR to reset the chip.
    pub reset_command: u32,
    /// Whether the part has a brownout detector we can configure.
    pub can_brownout: bool,
    /// Page write strategy.
    pub strategy: WriteStrategy,
}

const SAM_X7X_PROFILE: ChipProfile = ChipProfile {
    family: ChipFamily::Samx7x21,
    flash_base: 0x0040_0000,
    page_count: 4096,
    page_size: 512,
    planes: 1,
    lock_regions: 128,
    user: 0x2040_1000,
    stack: 0x2042_0000,
    eefc_base: 0x400E_0C00,
    rstc_base: 0x400E_1800,
    reset_command: (RSTC_CR_KEY << 24) | RSTC_CR_PROCRST,
    can_brownout: false,
    strategy: WriteStrategy::Direct,
};

struct RegistryEntry {
    ids: &'static [u32],
    profile: ChipProfile,
}

static REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        // SAM3X8 H / E / C
        ids: &[0x286E_0A60, 0x285E_0A60, 0x284E_0A60],
        profile: ChipProfile {
            family: ChipFamily::Sam3x8,
            flash_base: 0x0008_0000,
            page_count: 2048,
            page_size: 256,
            planes: 2,
            lock_regions: 32,
            user: 0x2000_1000,
            stack: 0x2001_0000,
            eefc_base: 0x400E_0A00,
            rstc_base: 0x400E_1A00,
            reset_command: (RSTC_CR_KEY << 24) | RSTC_CR_PROCRST | RSTC_CR_PERRST,
            can_brownout: false,
            strategy: WriteStrategy::Direct,
        },
    },
    RegistryEntry {
        // E70 / S70 / V71 [JQN]21, there is no V70x21
        ids: &[0xA102_0E00, 0xA112_0E00, 0xA122_0E00],
        profile: SAM_X7X_PROFILE,
    },
    RegistryEntry {
        // E70 / S70 / V71 / V70 [JQN]20
        ids: &[0xA102_0C00, 0xA112_0C00, 0xA122_0C00, 0xA132_0C00],
        profile: ChipProfile {
            family: ChipFamily::Samx7x20,
            page_count: 2048,
            lock_regions: 64,
            ..SAM_X7X_PROFILE
        },
    },
    RegistryEntry {
        // E70 / S70 / V71 / V70 [JQN]19
        ids: &[0xA10D_0A00, 0xA11D_0A00, 0xA12D_0A00, 0xA13D_0A00],
        profile: ChipProfile {
            family: ChipFamily::Samx7x19,
            page_count: 1024,
            lock_regions: 32,
            ..SAM_X7X_PROFILE
        },
    },
];

impl ChipProfile {
    /// Look up the profile for a CHIPID value.
    ///
    /// Unknown identifiers are an error; there is no fallback profile.
    pub fn from_chip_id(chip_id: u32) -> Result<Self> {
        REGISTRY
            .iter()
            .find(|entry| entry.ids.contains(&chip_id))
            .map(|entry| entry.profile.clone())
            .ok_or(Error::UnknownChip(chip_id))
    }

    /// Every registered chip id with its profile.
    pub fn all() -> impl Iterator<Item = (u32, &'static ChipProfile)> {
        REGISTRY
            .iter()
            .flat_map(|entry| entry.ids.iter().map(move |id| (*id, &entry.profile)))
    }

    /// Derive a profile that writes pages with another strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Total flash size in bytes.
    pub fn flash_size(&self) -> u32 {
        self.page_count * self.page_size
    }

    /// Number of pages handled by each plane.
    pub fn pages_per_plane(&self) -> u32 {
        self.page_count / self.planes
    }

    /// Absolute address of `page`.
    pub fn page_address(&self, page: u32) -> u32 {
        self.flash_base + page * self.page_size
    }

    /// Resolve the plane and in-plane index of `page`.
    ///
    /// On dual-plane parts the upper half of the page space belongs to
    /// plane 1.
    pub fn placement(&self, page: u32) -> PagePlacement {
        let half = self.page_count / 2;
        if self.planes > 1 && page >= half {
            PagePlacement {
                plane: 1,
                index: page - half,
            }
        } else {
            PagePlacement {
                plane: 0,
                index: page,
            }
        }
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} KiB flash at {:#010x} ({} x {} byte pages, {} plane{})",
            self.family,
            self.flash_size() / 1024,
            self.flash_base,
            self.page_count,
            self.page_size,
            self.planes,
            if self.planes > 1 { "s" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_profiles_consistent() {
        for (id, profile) in ChipProfile::all() {
            assert!(
                profile.planes == 1 || profile.planes == 2,
                "{id:#010x}: bad plane count"
            );
            assert_eq!(profile.page_count % profile.planes, 0, "{id:#010x}");
            assert!(profile.page_size.is_power_of_two(), "{id:#010x}");
            assert_eq!(profile.page_count % profile.lock_regions, 0, "{id:#010x}");
            assert_eq!(profile.reset_command >> 24, 0xA5, "{id:#010x}");
            assert_eq!(profile.strategy, WriteStrategy::Direct);
        }
    }

    #[test]
    fn test_from_chip_id_sam3x() {
        for id in [0x286E_0A60, 0x285E_0A60, 0x284E_0A60] {
            let profile = ChipProfile::from_chip_id(id).unwrap();
            assert_eq!(profile.family, ChipFamily::Sam3x8);
            assert_eq!(profile.planes, 2);
            assert_eq!(profile.page_count, 2048);
            assert_eq!(profile.page_size, 256);
            assert_eq!(profile.reset_command, 0xA500_0005);
        }
    }

    #[test]
    fn test_from_chip_id_samx7x() {
        let p21 = ChipProfile::from_chip_id(0xA102_0E00).unwrap();
        assert_eq!(p21.family, ChipFamily::Samx7x21);
        assert_eq!(p21.flash_size(), 2 * 1024 * 1024);
        assert_eq!(p21.reset_command, 0xA500_0001);

        let p20 = ChipProfile::from_chip_id(0xA132_0C00).unwrap();
        assert_eq!(p20.family, ChipFamily::Samx7x20);
        assert_eq!(p20.page_count, 2048);
        assert_eq!(p20.lock_regions, 64);
        assert_eq!(p20.eefc_base, 0x400E_0C00);

        let p19 = ChipProfile::from_chip_id(0xA12D_0A00).unwrap();
        assert_eq!(p19.family, ChipFamily::Samx7x19);
        assert_eq!(p19.page_count, 1024);
    }

    #[test]
    fn test_unknown_chip_id_is_error() {
        match ChipProfile::from_chip_id(0xDEAD_BEEF) {
            Err(Error::UnknownChip(id)) => assert_eq!(id, 0xDEAD_BEEF),
            other => panic!("expected UnknownChip, got {other:?}"),
        }
    }

    #[test]
    fn test_placement_dual_plane() {
        let profile = ChipProfile::from_chip_id(0x285E_0A60).unwrap();
        let half = profile.page_count / 2;
        for page in [0, 1, half - 1, half, half + 1, profile.page_count - 1] {
            let placement = profile.placement(page);
            if page >= half {
                assert_eq!(placement.plane, 1);
                assert_eq!(placement.index, page - half);
            } else {
                assert_eq!(placement.plane, 0);
                assert_eq!(placement.index, page);
            }
        }
    }

    #[test]
    fn test_placement_page_1100_on_sam3x() {
        let profile = ChipProfile::from_chip_id(0x284E_0A60).unwrap();
        assert_eq!(
            profile.placement(1100),
            PagePlacement {
                plane: 1,
                index: 76
            }
        );
        assert_eq!(profile.page_address(1100), 0x0008_0000 + 1100 * 256);
    }

    #[test]
    fn test_placement_single_plane() {
        let profile = ChipProfile::from_chip_id(0xA102_0E00).unwrap();
        let placement = profile.placement(4000);
        assert_eq!(placement.plane, 0);
        assert_eq!(placement.index, 4000);
    }

    #[test]
    fn test_with_strategy() {
        let profile = ChipProfile::from_chip_id(0x284E_0A60)
            .unwrap()
            .with_strategy(WriteStrategy::Assisted(SAM3X_ASSIST));
        assert_eq!(profile.strategy, WriteStrategy::Assisted(SAM3X_ASSIST));
    }

    #[test]
    fn test_assist_layout_fits_in_sram() {
        let profile = ChipProfile::from_chip_id(0x284E_0A60).unwrap();
        let layout = SAM3X_ASSIST;
        assert_eq!(layout.load_addr, profile.user);
        assert!(layout.load_addr + layout.max_code_len <= layout.copy_from_ptr);
        assert!(layout.buffer0 + profile.page_size <= layout.buffer1);
        assert!(layout.buffer1 + profile.page_size < profile.stack);
    }

    #[test]
    fn test_display() {
        let profile = ChipProfile::from_chip_id(0x284E_0A60).unwrap();
        assert_eq!(
            profile.to_string(),
            "ATSAM3X8: 512 KiB flash at 0x00080000 (2048 x 256 byte pages, 2 planes)"
        );
    }
}
