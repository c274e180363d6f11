//! Error taxonomy shared by the CLI and the session core.
//!
//! Every variant is terminal for the invocation: stflash is a single-shot
//! tool with no retry policy. The only "recovery" anywhere is the
//! best-effort mode restoration on the teardown paths, and that never
//! reports failures of its own.

use thiserror::Error;

/// Top-level failure classes, one per step that can go wrong.
#[derive(Debug, Error)]
pub enum Error {
    /// The command line did not resolve to a valid operation.
    #[error("invalid command line: {0}")]
    InvalidArguments(String),

    /// The `--serial` argument is not a valid hex-encoded probe serial.
    #[error("invalid serial: {0}")]
    InvalidSerial(String),

    /// No matching probe was found, opening it failed, or the attached
    /// target could not be identified.
    #[error("failed to open the debug probe: {0}")]
    DeviceOpenFailed(String),

    /// A bootloader-exit or debug-entry request was rejected.
    #[error("probe mode transition failed: {0}")]
    ModeTransitionFailed(String),

    /// The NRST pulse or the system reset was rejected.
    #[error("target reset failed: {0}")]
    ResetFailed(String),

    /// The core refused to enter the debug-halt state.
    #[error("failed to halt the core: {0}")]
    HaltFailed(String),

    /// The core status could not be read back after halting.
    #[error("failed to read the core status: {0}")]
    StatusCheckFailed(String),

    /// A transfer primitive reported failure mid-operation.
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

/// Result alias over the taxonomy above.
pub type Result<T> = std::result::Result<T, Error>;
