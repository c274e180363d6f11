//! The fixed interface between the session core and a probe backend.
//!
//! A backend hands the session a boxed [`DebugProbe`] and everything above
//! this seam is protocol-agnostic. Primitive failures are opaque up here:
//! the session only cares *which step* failed and maps that onto the error
//! taxonomy itself.

use std::fmt;
use std::path::PathBuf;

use crate::serial::SerialFilter;

/// Opaque failure from a probe primitive.
///
/// Backends keep their own detailed error types and flatten them into this
/// at the trait boundary; the session attributes the failure to a step.
#[derive(Debug)]
pub struct ProbeError(String);

impl ProbeError {
    /// Wrap a backend failure message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Result alias for probe primitives.
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Mode the probe firmware reports itself in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// DFU / bootloader mode, where some firmware revisions power up.
    Dfu,
    /// Mass-storage mode (the V1 bridge idles here).
    MassStorage,
    /// Debug (SWD/JTAG) mode.
    Debug,
    /// A mode byte we do not know.
    Unknown(u8),
}

/// Core execution state reported by the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    /// The core is executing.
    Running,
    /// The core sits in debug-halt.
    Halted,
    /// A status byte we do not know.
    Unknown(u8),
}

/// Chip family of the attached target, for quirk selection and the flash
/// engine's register-layout choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    /// STM32F0 (F1-compatible flash controller).
    F0,
    /// STM32F1 (all density lines).
    F1,
    /// STM32F2 (sector-based flash controller).
    F2,
    /// STM32F4 (sector-based flash controller, DMA quirk).
    F4,
}

/// Target parameters resolved once debug access is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetParams {
    /// 12-bit device id from the MCU's debug id register.
    pub chip_id: u32,
    /// Family the id maps to.
    pub family: ChipFamily,
    /// Human-readable chip description.
    pub description: &'static str,
    /// Flash base address.
    pub flash_base: u32,
    /// Flash size in bytes.
    pub flash_size: u32,
    /// SRAM base address.
    pub sram_base: u32,
    /// SRAM size in bytes.
    pub sram_size: u32,
}

/// How an invocation selects the probe to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSelector {
    /// Legacy ST-Link/V1 mass-storage bridge device node (`/dev/sgX`).
    Bridge(PathBuf),
    /// Direct USB, optionally narrowed to one probe by serial filter.
    Usb(Option<SerialFilter>),
}

/// Progress sink for the streaming flash write.
///
/// All methods default to no-ops so backends can report as much or as
/// little as they have; the CLI plugs progress bars in here.
pub trait FlashProgress {
    /// Erase phase started, covering `units` pages or sectors.
    fn erasing(&mut self, units: usize) {
        let _ = units;
    }
    /// Programming phase started for `total_bytes`.
    fn programming(&mut self, total_bytes: usize) {
        let _ = total_bytes;
    }
    /// `bytes_done` of the current phase are through.
    fn progress(&mut self, bytes_done: usize) {
        let _ = bytes_done;
    }
    /// Read-back verification started for `total_bytes`.
    fn verifying(&mut self, total_bytes: usize) {
        let _ = total_bytes;
    }
    /// The transfer finished.
    fn finished(&mut self) {}
}

/// Progress sink that reports nothing.
pub struct NoProgress;

impl FlashProgress for NoProgress {}

/// The fixed set of operations a probe backend provides.
///
/// Everything is blocking; failure reasons are opaque beyond the message.
/// The session sequences these - backends must not chain mode transitions
/// on their own.
pub trait DebugProbe {
    /// Mode the probe currently reports.
    fn current_mode(&mut self) -> ProbeResult<ProbeMode>;

    /// Leave DFU / bootloader mode.
    fn exit_dfu_mode(&mut self) -> ProbeResult<()>;

    /// Enter SWD debug mode.
    fn enter_swd_mode(&mut self) -> ProbeResult<()>;

    /// Pulse the NRST line.
    fn nrst_pulse(&mut self) -> ProbeResult<()>;

    /// Request a system reset through the debug port.
    fn target_reset(&mut self) -> ProbeResult<()>;

    /// Let the core run again. This is also what puts a V1 bridge back
    /// into a mass-storage-compatible state.
    fn run(&mut self) -> ProbeResult<()>;

    /// Force the core into debug-halt.
    fn force_halt(&mut self) -> ProbeResult<()>;

    /// Read back the core execution state.
    fn core_status(&mut self) -> ProbeResult<CoreState>;

    /// Identify the attached target and resolve its memory parameters.
    /// Requires debug mode.
    fn read_target_params(&mut self) -> ProbeResult<TargetParams>;

    /// Write one 32-bit peripheral register on the target.
    fn write_reg32(&mut self, addr: u32, value: u32) -> ProbeResult<()>;

    /// Read target memory into `buf`, starting at `addr`.
    fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> ProbeResult<()>;

    /// Write `data` into SRAM starting at `addr`.
    fn write_sram(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()>;

    /// Program `data` into flash starting at `addr`, erasing as needed.
    fn write_flash(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> ProbeResult<()>;

    /// Erase the whole flash array.
    fn mass_erase(&mut self) -> ProbeResult<()>;

    /// Leave debug mode.
    fn exit_debug_mode(&mut self) -> ProbeResult<()>;

    /// Release the underlying handle. Safe to call more than once; later
    /// operations fail.
    fn close(&mut self);
}
