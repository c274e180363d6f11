//! stflash-dummy - In-memory emulated target
//!
//! Implements `DebugProbe` against two byte buffers standing in for the
//! target's flash and SRAM. Used by the session and executor tests, and
//! handy for development without hardware. The emulation is strict about
//! sequencing: memory access demands debug mode, so a test that skips a
//! transition fails the way real hardware would.

use stflash_core::{
    ChipFamily, CoreState, DebugProbe, FlashProgress, ProbeError, ProbeMode, ProbeResult,
    TargetParams,
};

/// Configuration of the emulated probe and target.
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Reported chip id.
    pub chip_id: u32,
    /// Reported chip family.
    pub family: ChipFamily,
    /// Flash window base.
    pub flash_base: u32,
    /// Flash window size in bytes.
    pub flash_size: u32,
    /// SRAM window base.
    pub sram_base: u32,
    /// SRAM window size in bytes.
    pub sram_size: u32,
    /// Mode the probe starts out in.
    pub start_mode: ProbeMode,
}

impl Default for DummyConfig {
    fn default() -> Self {
        // F1 medium-density with its stock memory map, fresh out of DFU
        // like a just-plugged probe.
        Self {
            chip_id: 0x410,
            family: ChipFamily::F1,
            flash_base: 0x0800_0000,
            flash_size: 128 * 1024,
            sram_base: 0x2000_0000,
            sram_size: 20 * 1024,
            start_mode: ProbeMode::Dfu,
        }
    }
}

/// Emulated probe plus target.
pub struct DummyProbe {
    config: DummyConfig,
    flash: Vec<u8>,
    sram: Vec<u8>,
    mode: ProbeMode,
    core: CoreState,
    closed: bool,
    /// Every 32-bit register poke, for quirk assertions.
    pub reg_writes: Vec<(u32, u32)>,
    /// Number of reset requests seen.
    pub resets: usize,
    /// Fail the next flash write with a scripted error.
    pub fail_flash_write: bool,
    /// Fail the mass erase with a scripted error.
    pub fail_mass_erase: bool,
}

impl DummyProbe {
    /// Create an emulated probe with the given configuration.
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.flash_size as usize];
        let sram = vec![0; config.sram_size as usize];
        let mode = config.start_mode;
        Self {
            config,
            flash,
            sram,
            mode,
            core: CoreState::Running,
            closed: false,
            reg_writes: Vec::new(),
            resets: 0,
            fail_flash_write: false,
            fail_mass_erase: false,
        }
    }

    /// Create an emulated probe with the default configuration.
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// The emulated flash contents.
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// The emulated SRAM contents.
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    fn ensure_open(&self) -> ProbeResult<()> {
        if self.closed {
            return Err(ProbeError::new("probe handle already closed"));
        }
        Ok(())
    }

    fn ensure_debug(&self) -> ProbeResult<()> {
        self.ensure_open()?;
        if self.mode != ProbeMode::Debug {
            return Err(ProbeError::new(format!(
                "memory access requires debug mode, probe is in {:?}",
                self.mode
            )));
        }
        Ok(())
    }

    fn window_of(&self, addr: u32, len: usize) -> Option<(bool, usize)> {
        let end = addr.checked_add(len as u32)?;
        if addr >= self.config.flash_base
            && end <= self.config.flash_base + self.config.flash_size
        {
            Some((true, (addr - self.config.flash_base) as usize))
        } else if addr >= self.config.sram_base
            && end <= self.config.sram_base + self.config.sram_size
        {
            Some((false, (addr - self.config.sram_base) as usize))
        } else {
            None
        }
    }
}

impl DebugProbe for DummyProbe {
    fn current_mode(&mut self) -> ProbeResult<ProbeMode> {
        self.ensure_open()?;
        Ok(self.mode)
    }

    fn exit_dfu_mode(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        self.mode = ProbeMode::MassStorage;
        Ok(())
    }

    fn enter_swd_mode(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        self.mode = ProbeMode::Debug;
        Ok(())
    }

    fn nrst_pulse(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        Ok(())
    }

    fn target_reset(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        self.resets += 1;
        self.core = CoreState::Running;
        Ok(())
    }

    fn run(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        self.core = CoreState::Running;
        Ok(())
    }

    fn force_halt(&mut self) -> ProbeResult<()> {
        self.ensure_debug()?;
        self.core = CoreState::Halted;
        Ok(())
    }

    fn core_status(&mut self) -> ProbeResult<CoreState> {
        self.ensure_debug()?;
        Ok(self.core)
    }

    fn read_target_params(&mut self) -> ProbeResult<TargetParams> {
        self.ensure_debug()?;
        Ok(TargetParams {
            chip_id: self.config.chip_id,
            family: self.config.family,
            description: "emulated target",
            flash_base: self.config.flash_base,
            flash_size: self.config.flash_size,
            sram_base: self.config.sram_base,
            sram_size: self.config.sram_size,
        })
    }

    fn write_reg32(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        self.ensure_debug()?;
        self.reg_writes.push((addr, value));
        Ok(())
    }

    fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> ProbeResult<()> {
        self.ensure_debug()?;
        match self.window_of(addr, buf.len()) {
            Some((true, off)) => buf.copy_from_slice(&self.flash[off..off + buf.len()]),
            Some((false, off)) => buf.copy_from_slice(&self.sram[off..off + buf.len()]),
            None => {
                return Err(ProbeError::new(format!(
                    "read of 0x{:x} bytes at 0x{addr:08x} leaves the emulated windows",
                    buf.len()
                )))
            }
        }
        Ok(())
    }

    fn write_sram(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()> {
        self.ensure_debug()?;
        match self.window_of(addr, data.len()) {
            Some((false, off)) => {
                self.sram[off..off + data.len()].copy_from_slice(data);
                Ok(())
            }
            _ => Err(ProbeError::new(format!(
                "SRAM write at 0x{addr:08x} leaves the emulated window"
            ))),
        }
    }

    fn write_flash(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> ProbeResult<()> {
        self.ensure_debug()?;
        if self.fail_flash_write {
            return Err(ProbeError::new("scripted flash write failure"));
        }
        match self.window_of(addr, data.len()) {
            Some((true, off)) => {
                progress.programming(data.len());
                self.flash[off..off + data.len()].copy_from_slice(data);
                progress.progress(data.len());
                progress.finished();
                Ok(())
            }
            _ => Err(ProbeError::new(format!(
                "flash write at 0x{addr:08x} leaves the emulated window"
            ))),
        }
    }

    fn mass_erase(&mut self) -> ProbeResult<()> {
        self.ensure_debug()?;
        if self.fail_mass_erase {
            return Err(ProbeError::new("scripted mass erase failure"));
        }
        log::debug!("mass erase: blanking {} bytes", self.flash.len());
        self.flash.fill(0xFF);
        Ok(())
    }

    fn exit_debug_mode(&mut self) -> ProbeResult<()> {
        self.ensure_open()?;
        self.mode = ProbeMode::MassStorage;
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug_probe() -> DummyProbe {
        let mut probe = DummyProbe::new_default();
        probe.enter_swd_mode().unwrap();
        probe
    }

    #[test]
    fn flash_write_reads_back() {
        let mut probe = debug_probe();
        let data = [0x12, 0x34, 0x56, 0x78];
        probe
            .write_flash(0x0800_1000, &data, &mut stflash_core::NoProgress)
            .unwrap();

        let mut buf = [0u8; 4];
        probe.read_mem(0x0800_1000, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn sram_write_reads_back() {
        let mut probe = debug_probe();
        let data = [0xAA; 16];
        probe.write_sram(0x2000_0100, &data).unwrap();

        let mut buf = [0u8; 16];
        probe.read_mem(0x2000_0100, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn mass_erase_blanks_the_flash() {
        let mut probe = debug_probe();
        probe
            .write_flash(0x0800_0000, &[0u8; 256], &mut stflash_core::NoProgress)
            .unwrap();
        probe.mass_erase().unwrap();
        assert!(probe.flash().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn memory_access_outside_debug_mode_fails() {
        let mut probe = DummyProbe::new_default();
        let mut buf = [0u8; 4];
        assert!(probe.read_mem(0x0800_0000, &mut buf).is_err());
        assert!(probe.force_halt().is_err());
    }

    #[test]
    fn writes_outside_the_windows_fail() {
        let mut probe = debug_probe();
        assert!(probe.write_sram(0x0800_0000, &[0u8; 4]).is_err());
        assert!(probe
            .write_flash(0x4000_0000, &[0u8; 4], &mut stflash_core::NoProgress)
            .is_err());
        // Crossing the end of the flash window is rejected too.
        assert!(probe
            .write_flash(0x0801_FFFE, &[0u8; 4], &mut stflash_core::NoProgress)
            .is_err());
    }

    #[test]
    fn scripted_failure_surfaces() {
        let mut probe = debug_probe();
        probe.fail_flash_write = true;
        assert!(probe
            .write_flash(0x0800_0000, &[0u8; 4], &mut stflash_core::NoProgress)
            .is_err());
    }
}
