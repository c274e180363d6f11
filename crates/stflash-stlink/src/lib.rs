//! stflash-stlink - ST-Link probe backend
//!
//! Implements the `DebugProbe` interface over the classic ST-Link command
//! set: directly over USB bulk transfers for V2 and V2-1 probes, and
//! through the SCSI-generic bridge for the V1's mass-storage endpoint.
//! The flash engine drives the target's FPEC registers straight over SWD.

#[cfg(target_os = "linux")]
mod bridge;
mod chips;
mod constants;
mod error;
mod flash;
mod probe;
mod usb;

pub use error::StLinkError;
pub use probe::{open, StLink};
