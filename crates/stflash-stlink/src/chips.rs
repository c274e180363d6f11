//! Known chips and their memory parameters.
//!
//! Keyed on the 12-bit device id from `DBGMCU_IDCODE`. The flash size is a
//! table default until the family's flash-size register yields something
//! sane; SRAM sizes are not discoverable and stay table-driven.

use stflash_core::ChipFamily;

pub(crate) struct ChipParams {
    pub id: u32,
    pub family: ChipFamily,
    pub description: &'static str,
    /// Default flash size in bytes.
    pub flash_size: u32,
    /// Address of the 16-bit flash-size-in-KiB register.
    pub flash_size_reg: u32,
    /// Erase granule for the page-based families; first-sector size on the
    /// sector-based ones (informational there).
    pub page_size: u32,
    pub sram_size: u32,
}

pub(crate) const FLASH_BASE: u32 = 0x0800_0000;
pub(crate) const SRAM_BASE: u32 = 0x2000_0000;

/// Debug id register; F0 parts moved it into the APB space.
pub(crate) const DBGMCU_IDCODE: u32 = 0xe004_2000;
pub(crate) const DBGMCU_IDCODE_F0: u32 = 0x4001_5800;

const KB: u32 = 1024;

pub(crate) static CHIPS: &[ChipParams] = &[
    ChipParams {
        id: 0x410,
        family: ChipFamily::F1,
        description: "STM32F1 medium-density",
        flash_size: 128 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: KB,
        sram_size: 20 * KB,
    },
    ChipParams {
        id: 0x412,
        family: ChipFamily::F1,
        description: "STM32F1 low-density",
        flash_size: 32 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: KB,
        sram_size: 10 * KB,
    },
    ChipParams {
        id: 0x414,
        family: ChipFamily::F1,
        description: "STM32F1 high-density",
        flash_size: 512 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: 2 * KB,
        sram_size: 64 * KB,
    },
    ChipParams {
        id: 0x418,
        family: ChipFamily::F1,
        description: "STM32F1 connectivity line",
        flash_size: 256 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: 2 * KB,
        sram_size: 64 * KB,
    },
    ChipParams {
        id: 0x420,
        family: ChipFamily::F1,
        description: "STM32F1 value line medium-density",
        flash_size: 128 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: KB,
        sram_size: 8 * KB,
    },
    ChipParams {
        id: 0x428,
        family: ChipFamily::F1,
        description: "STM32F1 value line high-density",
        flash_size: 512 * KB,
        flash_size_reg: 0x1fff_f7e0,
        page_size: 2 * KB,
        sram_size: 32 * KB,
    },
    ChipParams {
        id: 0x411,
        family: ChipFamily::F2,
        description: "STM32F2",
        flash_size: 1024 * KB,
        flash_size_reg: 0x1fff_7a22,
        page_size: 16 * KB,
        sram_size: 128 * KB,
    },
    ChipParams {
        id: 0x413,
        family: ChipFamily::F4,
        description: "STM32F4",
        flash_size: 1024 * KB,
        flash_size_reg: 0x1fff_7a22,
        page_size: 16 * KB,
        sram_size: 192 * KB,
    },
    ChipParams {
        id: 0x440,
        family: ChipFamily::F0,
        description: "STM32F0",
        flash_size: 64 * KB,
        flash_size_reg: 0x1fff_f7cc,
        page_size: KB,
        sram_size: 8 * KB,
    },
];

pub(crate) fn lookup(chip_id: u32) -> Option<&'static ChipParams> {
    CHIPS.iter().find(|c| c.id == chip_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_resolve() {
        assert_eq!(lookup(0x410).unwrap().family, ChipFamily::F1);
        assert_eq!(lookup(0x413).unwrap().family, ChipFamily::F4);
        assert!(lookup(0x999).is_none());
    }

    #[test]
    fn page_sizes_divide_flash_sizes() {
        for chip in CHIPS {
            assert_eq!(chip.flash_size % chip.page_size, 0, "{}", chip.description);
        }
    }
}
