//! Erase command implementation.

use stflash_core::{Result, Session};

/// Mass-erase the target's flash.
pub fn run(session: &mut Session) -> Result<()> {
    log::info!("mass-erasing the flash array");
    session.mass_erase()?;
    println!("Mass erase complete");
    Ok(())
}
