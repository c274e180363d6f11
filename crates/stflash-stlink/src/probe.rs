//! The ST-Link probe: protocol sequencing over an abstract transport and
//! the `DebugProbe` implementation the session consumes.

use std::path::Path;

use stflash_core::{
    CoreState, DebugProbe, Error, FlashProgress, ProbeMode, ProbeResult, ProbeSelector,
    TargetParams,
};

use crate::chips::{self, ChipParams};
use crate::constants::{
    commands, CORE_HALTED, CORE_RUNNING, DEV_DEBUG_MODE, DEV_DFU_MODE, DEV_MASS_MODE, MAX_XFER,
    MAX_XFER_8BIT, STATUS_JTAG_OK,
};
use crate::error::StLinkError;
use crate::flash;
use crate::usb::UsbTransport;

/// One blocking protocol transaction: a command block and at most one data
/// stage, in one direction.
pub(crate) trait Transport {
    fn command(
        &mut self,
        cmd: &[u8],
        data_out: &[u8],
        read_len: usize,
    ) -> Result<Vec<u8>, StLinkError>;
}

/// Which generation of the debug command set the firmware speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DebugApi {
    V1,
    V2,
}

/// An open ST-Link probe.
pub struct StLink {
    transport: Option<Box<dyn Transport>>,
    api: DebugApi,
    hw_version: u8,
    jtag_version: u8,
    chip: Option<&'static ChipParams>,
    flash_size: u32,
}

/// Open the probe named by the selector and bring the link up.
pub fn open(selector: &ProbeSelector) -> stflash_core::Result<Box<dyn DebugProbe>> {
    let result = match selector {
        ProbeSelector::Bridge(path) => StLink::open_bridge(path),
        ProbeSelector::Usb(filter) => StLink::open_usb(filter.as_ref()),
    };
    result
        .map(|probe| Box::new(probe) as Box<dyn DebugProbe>)
        .map_err(|e| Error::DeviceOpenFailed(e.to_string()))
}

impl StLink {
    /// Open a V2 or V2-1 probe over USB.
    pub fn open_usb(filter: Option<&stflash_core::SerialFilter>) -> Result<Self, StLinkError> {
        let transport = UsbTransport::open(filter)?;
        let mut probe = Self::from_transport(Box::new(transport), DebugApi::V2);
        probe.init()?;
        Ok(probe)
    }

    /// Open a V1 probe through its mass-storage bridge device node.
    pub fn open_bridge(path: &Path) -> Result<Self, StLinkError> {
        #[cfg(target_os = "linux")]
        {
            let transport = crate::bridge::BridgeTransport::open(path)?;
            let mut probe = Self::from_transport(Box::new(transport), DebugApi::V1);
            probe.init()?;
            Ok(probe)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = path;
            Err(StLinkError::Protocol(
                "the V1 bridge is only supported on Linux".into(),
            ))
        }
    }

    fn from_transport(transport: Box<dyn Transport>, api: DebugApi) -> Self {
        Self {
            transport: Some(transport),
            api,
            hw_version: 0,
            jtag_version: 0,
            chip: None,
            flash_size: 0,
        }
    }

    fn init(&mut self) -> Result<(), StLinkError> {
        let buf = self.cmd(&[commands::GET_VERSION], 6)?;
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        self.hw_version = (version >> 12) as u8 & 0x0f;
        self.jtag_version = (version >> 6) as u8 & 0x3f;
        if self.hw_version == 1 {
            self.api = DebugApi::V1;
        }
        log::debug!(
            "ST-Link hardware v{}, firmware J{}",
            self.hw_version,
            self.jtag_version
        );

        if self.api == DebugApi::V2 {
            self.check_target_voltage()?;
        }
        Ok(())
    }

    fn check_target_voltage(&mut self) -> Result<(), StLinkError> {
        let buf = self.cmd(&[commands::GET_TARGET_VOLTAGE], 8)?;
        let a0 = u32_le(&buf[0..4]);
        let a1 = u32_le(&buf[4..8]);
        if a0 != 0 {
            let volts = 2.0 * a1 as f32 * 1.2 / a0 as f32;
            log::info!("target voltage: {volts:.2} V");
            if volts < 2.0 {
                log::warn!("target voltage looks too low for flash programming");
            }
        }
        Ok(())
    }

    pub(crate) fn api(&self) -> DebugApi {
        self.api
    }

    pub(crate) fn chip(&self) -> Result<&'static ChipParams, StLinkError> {
        self.chip
            .ok_or_else(|| StLinkError::Protocol("target not identified yet".into()))
    }

    pub(crate) fn flash_size(&self) -> u32 {
        self.flash_size
    }

    fn transport(&mut self) -> Result<&mut dyn Transport, StLinkError> {
        match self.transport.as_mut() {
            Some(t) => Ok(t.as_mut()),
            None => Err(StLinkError::Protocol("probe handle already closed".into())),
        }
    }

    fn cmd(&mut self, cmd: &[u8], read_len: usize) -> Result<Vec<u8>, StLinkError> {
        self.transport()?.command(cmd, &[], read_len)
    }

    fn cmd_write(&mut self, cmd: &[u8], data: &[u8]) -> Result<(), StLinkError> {
        self.transport()?.command(cmd, data, 0)?;
        Ok(())
    }

    fn check_status(buf: &[u8]) -> Result<(), StLinkError> {
        match buf.first() {
            Some(&STATUS_JTAG_OK) => Ok(()),
            Some(&status) => Err(StLinkError::CommandFailed(status)),
            None => Err(StLinkError::Protocol("empty status reply".into())),
        }
    }

    fn mem_cmd(sub: u8, addr: u32, len: u16) -> [u8; 8] {
        let mut cmd = [0u8; 8];
        cmd[0] = commands::DEBUG_COMMAND;
        cmd[1] = sub;
        cmd[2..6].copy_from_slice(&addr.to_le_bytes());
        cmd[6..8].copy_from_slice(&len.to_le_bytes());
        cmd
    }

    fn block_read32(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, StLinkError> {
        debug_assert!(addr % 4 == 0 && len % 4 == 0 && len <= MAX_XFER);
        let cmd = Self::mem_cmd(commands::DEBUG_READ_MEM_32BIT, addr, len as u16);
        self.cmd(&cmd, len)
    }

    fn block_write32(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        debug_assert!(addr % 4 == 0 && data.len() % 4 == 0 && data.len() <= MAX_XFER);
        let cmd = Self::mem_cmd(commands::DEBUG_WRITE_MEM_32BIT, addr, data.len() as u16);
        self.cmd_write(&cmd, data)
    }

    fn block_write16(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        debug_assert!(addr % 2 == 0 && data.len() % 2 == 0 && data.len() <= MAX_XFER);
        let cmd = Self::mem_cmd(commands::DEBUG_WRITE_MEM_16BIT, addr, data.len() as u16);
        self.cmd_write(&cmd, data)
    }

    fn block_write8(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        debug_assert!(data.len() <= MAX_XFER_8BIT);
        let cmd = Self::mem_cmd(commands::DEBUG_WRITE_MEM_8BIT, addr, data.len() as u16);
        self.cmd_write(&cmd, data)
    }

    /// Chunked, alignment-tolerant memory read.
    pub(crate) fn mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StLinkError> {
        let mut done = 0usize;
        while done < buf.len() {
            let chunk_addr = addr + done as u32;
            let aligned = chunk_addr & !3;
            let lead = (chunk_addr - aligned) as usize;
            let want = (buf.len() - done).min(MAX_XFER - lead);
            let span = (lead + want + 3) & !3;
            let data = self.block_read32(aligned, span)?;
            buf[done..done + want].copy_from_slice(&data[lead..lead + want]);
            done += want;
        }
        Ok(())
    }

    /// Chunked 32-bit write; `addr` and the length must be word-aligned.
    pub(crate) fn mem_write32(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        debug_assert!(addr % 4 == 0 && data.len() % 4 == 0);
        let mut done = 0usize;
        while done < data.len() {
            let n = (data.len() - done).min(MAX_XFER);
            self.block_write32(addr + done as u32, &data[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    /// Chunked 16-bit write; `addr` and the length must be halfword-aligned.
    pub(crate) fn mem_write16(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        debug_assert!(addr % 2 == 0 && data.len() % 2 == 0);
        let mut done = 0usize;
        while done < data.len() {
            let n = (data.len() - done).min(MAX_XFER);
            self.block_write16(addr + done as u32, &data[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    /// SRAM write: bulk 32-bit transfers where alignment allows, 8-bit for
    /// the rest.
    pub(crate) fn sram_write(&mut self, addr: u32, data: &[u8]) -> Result<(), StLinkError> {
        let mut done = 0usize;
        if addr % 4 == 0 {
            let aligned_len = data.len() & !3;
            while done < aligned_len {
                let n = (aligned_len - done).min(MAX_XFER);
                self.block_write32(addr + done as u32, &data[done..done + n])?;
                done += n;
            }
        }
        while done < data.len() {
            let n = (data.len() - done).min(MAX_XFER_8BIT);
            self.block_write8(addr + done as u32, &data[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    pub(crate) fn reg_read32(&mut self, addr: u32) -> Result<u32, StLinkError> {
        let buf = self.block_read32(addr, 4)?;
        Ok(u32_le(&buf))
    }

    pub(crate) fn reg_write32(&mut self, addr: u32, value: u32) -> Result<(), StLinkError> {
        self.block_write32(addr, &value.to_le_bytes())
    }

    fn identify(&mut self) -> Result<TargetParams, StLinkError> {
        let mut idcode = self.reg_read32(chips::DBGMCU_IDCODE)?;
        if idcode == 0 {
            idcode = self.reg_read32(chips::DBGMCU_IDCODE_F0)?;
        }
        let chip_id = idcode & 0xfff;
        let chip = chips::lookup(chip_id).ok_or(StLinkError::UnknownChip(chip_id))?;

        let mut flash_size = chip.flash_size;
        let mut kb_buf = [0u8; 2];
        match self.mem_read(chip.flash_size_reg, &mut kb_buf) {
            Ok(()) => {
                let kb = u16::from_le_bytes(kb_buf) as u32;
                if kb != 0 && kb != 0xffff {
                    flash_size = kb * 1024;
                } else {
                    log::warn!("flash size register reads 0x{kb:04x}, using the table default");
                }
            }
            Err(e) => {
                log::warn!("flash size register unreadable ({e}), using the table default");
            }
        }

        self.chip = Some(chip);
        self.flash_size = flash_size;

        Ok(TargetParams {
            chip_id,
            family: chip.family,
            description: chip.description,
            flash_base: chips::FLASH_BASE,
            flash_size,
            sram_base: chips::SRAM_BASE,
            sram_size: chip.sram_size,
        })
    }
}

impl DebugProbe for StLink {
    fn current_mode(&mut self) -> ProbeResult<ProbeMode> {
        let buf = self.cmd(&[commands::GET_CURRENT_MODE], 2)?;
        Ok(match buf[0] {
            DEV_DFU_MODE => ProbeMode::Dfu,
            DEV_MASS_MODE => ProbeMode::MassStorage,
            DEV_DEBUG_MODE => ProbeMode::Debug,
            other => ProbeMode::Unknown(other),
        })
    }

    fn exit_dfu_mode(&mut self) -> ProbeResult<()> {
        self.cmd(&[commands::DFU_COMMAND, commands::DFU_EXIT], 0)?;
        Ok(())
    }

    fn enter_swd_mode(&mut self) -> ProbeResult<()> {
        match self.api {
            DebugApi::V1 => {
                self.cmd(
                    &[
                        commands::DEBUG_COMMAND,
                        commands::DEBUG_APIV1_ENTER,
                        commands::DEBUG_ENTER_SWD,
                    ],
                    0,
                )?;
            }
            DebugApi::V2 => {
                let buf = self.cmd(
                    &[
                        commands::DEBUG_COMMAND,
                        commands::DEBUG_APIV2_ENTER,
                        commands::DEBUG_ENTER_SWD,
                        0,
                    ],
                    2,
                )?;
                Self::check_status(&buf)?;
            }
        }
        Ok(())
    }

    fn nrst_pulse(&mut self) -> ProbeResult<()> {
        if self.api == DebugApi::V1 {
            // The V1 firmware cannot drive NRST; the system reset that
            // follows still goes through.
            log::debug!("NRST drive not available on the V1 bridge");
            return Ok(());
        }
        let buf = self.cmd(
            &[
                commands::DEBUG_COMMAND,
                commands::DEBUG_DRIVE_NRST,
                commands::DEBUG_DRIVE_NRST_PULSE,
            ],
            2,
        )?;
        Ok(Self::check_status(&buf)?)
    }

    fn target_reset(&mut self) -> ProbeResult<()> {
        match self.api {
            DebugApi::V1 => {
                self.cmd(
                    &[commands::DEBUG_COMMAND, commands::DEBUG_APIV1_RESET_SYS],
                    2,
                )?;
            }
            DebugApi::V2 => {
                let buf = self.cmd(
                    &[commands::DEBUG_COMMAND, commands::DEBUG_APIV2_RESET_SYS],
                    2,
                )?;
                Self::check_status(&buf)?;
            }
        }
        Ok(())
    }

    fn run(&mut self) -> ProbeResult<()> {
        self.cmd(&[commands::DEBUG_COMMAND, commands::DEBUG_RUN_CORE], 2)?;
        Ok(())
    }

    fn force_halt(&mut self) -> ProbeResult<()> {
        self.cmd(&[commands::DEBUG_COMMAND, commands::DEBUG_FORCE_DEBUG], 2)?;
        Ok(())
    }

    fn core_status(&mut self) -> ProbeResult<CoreState> {
        let buf = self.cmd(&[commands::DEBUG_COMMAND, commands::DEBUG_GET_STATUS], 2)?;
        Ok(match buf[0] {
            CORE_RUNNING => CoreState::Running,
            CORE_HALTED => CoreState::Halted,
            other => CoreState::Unknown(other),
        })
    }

    fn read_target_params(&mut self) -> ProbeResult<TargetParams> {
        Ok(self.identify()?)
    }

    fn write_reg32(&mut self, addr: u32, value: u32) -> ProbeResult<()> {
        Ok(self.reg_write32(addr, value)?)
    }

    fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> ProbeResult<()> {
        Ok(self.mem_read(addr, buf)?)
    }

    fn write_sram(&mut self, addr: u32, data: &[u8]) -> ProbeResult<()> {
        Ok(self.sram_write(addr, data)?)
    }

    fn write_flash(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> ProbeResult<()> {
        Ok(flash::write(self, addr, data, progress)?)
    }

    fn mass_erase(&mut self) -> ProbeResult<()> {
        Ok(flash::mass_erase(self)?)
    }

    fn exit_debug_mode(&mut self) -> ProbeResult<()> {
        self.cmd(&[commands::DEBUG_COMMAND, commands::DEBUG_EXIT], 0)?;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the transport releases the USB interface or the bridge
        // file descriptor.
        self.transport = None;
    }
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
