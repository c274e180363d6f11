//! Chip-specific hazards worked around before any flash operation.
//!
//! Quirks are a strategy list keyed on the chip family so that new
//! families add an entry here instead of growing a chip-id switch in the
//! session.

use crate::error::{Error, Result};
use crate::probe::{ChipFamily, DebugProbe};

/// One chip-specific mitigation, applied after debug access is up and
/// before the core is halted for flash work.
pub trait ChipQuirk: Sync {
    /// Short identifier for logging.
    fn name(&self) -> &'static str;

    /// Whether the quirk concerns the given family.
    fn applies_to(&self, family: ChipFamily) -> bool;

    /// Perform the mitigation.
    fn apply(&self, probe: &mut dyn DebugProbe) -> Result<()>;
}

const DMA1_BASE: u32 = 0x4002_6000;
const DMA2_BASE: u32 = 0x4002_6400;
const DMA_STREAM_STRIDE: u32 = 0x18;
const DMA_SXCR: u32 = 0x10;
const DMA_SXFCR: u32 = 0x24;
const DMA_STREAMS: u32 = 8;

/// F4: the DMA controllers keep running through a core halt and a stream
/// still pointed at flash corrupts programming. Zero the stream
/// configuration and FIFO control registers of streams 0-7 on both
/// controllers.
struct QuiesceDma;

impl ChipQuirk for QuiesceDma {
    fn name(&self) -> &'static str {
        "quiesce-dma"
    }

    fn applies_to(&self, family: ChipFamily) -> bool {
        family == ChipFamily::F4
    }

    fn apply(&self, probe: &mut dyn DebugProbe) -> Result<()> {
        for stream in 0..DMA_STREAMS {
            for base in [DMA1_BASE, DMA2_BASE] {
                probe
                    .write_reg32(base + DMA_SXCR + DMA_STREAM_STRIDE * stream, 0)
                    .map_err(|e| Error::TransferFailed(format!("DMA quiesce failed: {e}")))?;
                probe
                    .write_reg32(base + DMA_SXFCR + DMA_STREAM_STRIDE * stream, 0)
                    .map_err(|e| Error::TransferFailed(format!("DMA quiesce failed: {e}")))?;
            }
        }
        Ok(())
    }
}

static QUIRKS: &[&dyn ChipQuirk] = &[&QuiesceDma];

/// Apply every quirk registered for `family`.
pub fn apply(family: ChipFamily, probe: &mut dyn DebugProbe) -> Result<()> {
    for quirk in QUIRKS {
        if quirk.applies_to(family) {
            log::debug!("applying chip quirk {}", quirk.name());
            quirk.apply(probe)?;
        }
    }
    Ok(())
}
