//! Backend-local error type, flattened into the core's opaque
//! `ProbeError` at the trait boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StLinkError {
    #[error("no matching ST-Link probe found")]
    ProbeNotFound,

    #[error("USB error: {0}")]
    Usb(String),

    #[error("bridge I/O error: {0}")]
    Bridge(#[from] std::io::Error),

    #[error("probe rejected the command (status 0x{0:02x})")]
    CommandFailed(u8),

    #[error("unsupported chip id 0x{0:03x}")]
    UnknownChip(u32),

    #[error("flash operation timed out at 0x{0:08x}")]
    FlashTimeout(u32),

    #[error("flash controller reported errors (SR = 0x{0:08x})")]
    FlashErrors(u32),

    #[error("flash verify mismatch at 0x{addr:08x}: wrote 0x{wrote:02x}, read 0x{read:02x}")]
    VerifyMismatch { addr: u32, wrote: u8, read: u8 },

    #[error("{0}")]
    Protocol(String),
}

impl From<StLinkError> for stflash_core::ProbeError {
    fn from(e: StLinkError) -> Self {
        stflash_core::ProbeError::new(e.to_string())
    }
}
