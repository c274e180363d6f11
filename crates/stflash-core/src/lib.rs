//! stflash-core - Session state machine and probe abstraction
//!
//! Everything about driving a debug-probe session that is independent of
//! the wire protocol lives here: the [`DebugProbe`] trait the backends
//! implement, the mode-transition state machine, target memory region
//! classification, the probe serial filter, chip-specific hazard quirks,
//! and the process-wide rescue slot consulted by the signal handler.
//!
//! The crate never talks USB or ioctls itself; backends (`stflash-stlink`,
//! `stflash-dummy`) plug in below the [`DebugProbe`] seam and the CLI sits
//! on top of [`Session`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod probe;
pub mod quirks;
pub mod region;
pub mod rescue;
pub mod serial;
pub mod session;

pub use error::{Error, Result};
pub use probe::{
    ChipFamily, CoreState, DebugProbe, FlashProgress, NoProgress, ProbeError, ProbeMode,
    ProbeResult, ProbeSelector, TargetParams,
};
pub use region::Region;
pub use serial::SerialFilter;
pub use session::Session;
