//! Direct FPEC flash programming over the debug port.
//!
//! Two register layouts cover the supported families: the page-based
//! controller of F0/F1 at `0x4002_2000` and the sector-based controller of
//! F2/F4 at `0x4002_3c00`. Programming drives the controller registers
//! straight over SWD; there is no RAM-resident loader.

use std::time::{Duration, Instant};

use bitflags::bitflags;
use stflash_core::{ChipFamily, FlashProgress};

use crate::chips;
use crate::constants::MAX_XFER;
use crate::error::StLinkError;
use crate::probe::{DebugApi, StLink};

const F1_REGS: u32 = 0x4002_2000;
const F1_KEYR: u32 = F1_REGS + 0x04;
const F1_SR: u32 = F1_REGS + 0x0c;
const F1_CR: u32 = F1_REGS + 0x10;
const F1_AR: u32 = F1_REGS + 0x14;

const F4_REGS: u32 = 0x4002_3c00;
const F4_KEYR: u32 = F4_REGS + 0x04;
const F4_SR: u32 = F4_REGS + 0x0c;
const F4_CR: u32 = F4_REGS + 0x10;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

// F0/F1 FLASH_CR bits.
const F1_CR_PG: u32 = 1 << 0;
const F1_CR_PER: u32 = 1 << 1;
const F1_CR_MER: u32 = 1 << 2;
const F1_CR_STRT: u32 = 1 << 6;
const F1_CR_LOCK: u32 = 1 << 7;

// F2/F4 FLASH_CR bits.
const F4_CR_PG: u32 = 1 << 0;
const F4_CR_SER: u32 = 1 << 1;
const F4_CR_MER: u32 = 1 << 2;
const F4_CR_SNB_SHIFT: u32 = 3;
const F4_CR_PSIZE_X32: u32 = 2 << 8;
const F4_CR_STRT: u32 = 1 << 16;
const F4_CR_LOCK: u32 = 1 << 31;

bitflags! {
    struct F1Sr: u32 {
        const BSY = 1 << 0;
        const PGERR = 1 << 2;
        const WRPRTERR = 1 << 4;
        const EOP = 1 << 5;
    }
}

bitflags! {
    struct F4Sr: u32 {
        const EOP = 1 << 0;
        const OPERR = 1 << 1;
        const WRPERR = 1 << 4;
        const PGAERR = 1 << 5;
        const PGPERR = 1 << 6;
        const PGSERR = 1 << 7;
        const BSY = 1 << 16;
    }
}

const PROGRAM_TIMEOUT: Duration = Duration::from_secs(2);
const ERASE_TIMEOUT: Duration = Duration::from_secs(10);
// A full-chip erase on the larger F4 parts runs well over ten seconds.
const MASS_ERASE_TIMEOUT: Duration = Duration::from_secs(60);

const VERIFY_CHUNK: usize = 4096;

/// Erase the affected pages or sectors, program `data` at `addr`, and
/// verify by read-back.
pub(crate) fn write(
    probe: &mut StLink,
    addr: u32,
    data: &[u8],
    progress: &mut dyn FlashProgress,
) -> Result<(), StLinkError> {
    if data.is_empty() {
        return Ok(());
    }
    if addr < chips::FLASH_BASE {
        return Err(StLinkError::Protocol(format!(
            "flash write address 0x{addr:08x} is below the flash base"
        )));
    }
    match probe.chip()?.family {
        ChipFamily::F0 | ChipFamily::F1 => f1_write(probe, addr, data, progress)?,
        ChipFamily::F2 | ChipFamily::F4 => f4_write(probe, addr, data, progress)?,
    }
    verify(probe, addr, data, progress)?;
    progress.finished();
    Ok(())
}

/// Erase the whole flash array.
pub(crate) fn mass_erase(probe: &mut StLink) -> Result<(), StLinkError> {
    match probe.chip()?.family {
        ChipFamily::F0 | ChipFamily::F1 => {
            f1_unlock(probe)?;
            probe.reg_write32(F1_CR, F1_CR_MER)?;
            probe.reg_write32(F1_CR, F1_CR_MER | F1_CR_STRT)?;
            let sr = wait_f1(probe, MASS_ERASE_TIMEOUT, chips::FLASH_BASE)?;
            probe.reg_write32(F1_CR, F1_CR_LOCK)?;
            check_f1_errors(sr)
        }
        ChipFamily::F2 | ChipFamily::F4 => {
            f4_unlock(probe)?;
            probe.reg_write32(F4_CR, F4_CR_MER | F4_CR_PSIZE_X32 | F4_CR_STRT)?;
            let sr = wait_f4(probe, MASS_ERASE_TIMEOUT, chips::FLASH_BASE)?;
            probe.reg_write32(F4_CR, F4_CR_LOCK)?;
            check_f4_errors(sr)
        }
    }
}

fn f1_erase_page(probe: &mut StLink, page_addr: u32) -> Result<(), StLinkError> {
    probe.reg_write32(F1_CR, F1_CR_PER)?;
    probe.reg_write32(F1_AR, page_addr)?;
    probe.reg_write32(F1_CR, F1_CR_PER | F1_CR_STRT)?;
    let sr = wait_f1(probe, ERASE_TIMEOUT, page_addr)?;
    check_f1_errors(sr)
}

fn f1_write(
    probe: &mut StLink,
    addr: u32,
    data: &[u8],
    progress: &mut dyn FlashProgress,
) -> Result<(), StLinkError> {
    if probe.api() == DebugApi::V1 {
        return Err(StLinkError::Protocol(
            "halfword flash programming needs the probe's 16-bit memory write, \
             which the V1 bridge does not provide"
                .into(),
        ));
    }
    if addr % 2 != 0 {
        return Err(StLinkError::Protocol(format!(
            "flash write address 0x{addr:08x} is not halfword-aligned"
        )));
    }

    let page_size = probe.chip()?.page_size;
    f1_unlock(probe)?;

    let first = addr & !(page_size - 1);
    let last = addr + data.len() as u32 - 1;
    progress.erasing(((last - first) / page_size + 1) as usize);
    let mut page = first;
    while page <= last {
        f1_erase_page(probe, page)?;
        page += page_size;
    }

    // Flash erases to 0xff, so padding the odd tail with it is a no-op.
    let mut body = data.to_vec();
    if body.len() % 2 != 0 {
        body.push(0xff);
    }

    progress.programming(data.len());
    probe.reg_write32(F1_CR, F1_CR_PG)?;
    let mut done = 0usize;
    while done < body.len() {
        let n = (body.len() - done).min(MAX_XFER);
        probe.mem_write16(addr + done as u32, &body[done..done + n])?;
        let sr = wait_f1(probe, PROGRAM_TIMEOUT, addr + done as u32)?;
        check_f1_errors(sr)?;
        done += n;
        progress.progress(done.min(data.len()));
    }
    probe.reg_write32(F1_CR, F1_CR_LOCK)?;
    Ok(())
}

fn f4_write(
    probe: &mut StLink,
    addr: u32,
    data: &[u8],
    progress: &mut dyn FlashProgress,
) -> Result<(), StLinkError> {
    if addr % 4 != 0 {
        return Err(StLinkError::Protocol(format!(
            "flash write address 0x{addr:08x} is not word-aligned"
        )));
    }

    f4_unlock(probe)?;

    let start_off = addr - chips::FLASH_BASE;
    let end_off = start_off + data.len() as u32;
    let affected: Vec<Sector> = f4_sectors(probe.flash_size())
        .into_iter()
        .filter(|s| s.base < end_off && s.base + s.size > start_off)
        .collect();

    progress.erasing(affected.len());
    for sector in &affected {
        probe.reg_write32(
            F4_CR,
            F4_CR_SER | (sector.index << F4_CR_SNB_SHIFT) | F4_CR_PSIZE_X32 | F4_CR_STRT,
        )?;
        let sr = wait_f4(probe, ERASE_TIMEOUT, chips::FLASH_BASE + sector.base)?;
        check_f4_errors(sr)?;
    }

    let mut body = data.to_vec();
    while body.len() % 4 != 0 {
        body.push(0xff);
    }

    progress.programming(data.len());
    probe.reg_write32(F4_CR, F4_CR_PG | F4_CR_PSIZE_X32)?;
    let mut done = 0usize;
    while done < body.len() {
        let n = (body.len() - done).min(MAX_XFER);
        probe.mem_write32(addr + done as u32, &body[done..done + n])?;
        let sr = wait_f4(probe, PROGRAM_TIMEOUT, addr + done as u32)?;
        check_f4_errors(sr)?;
        done += n;
        progress.progress(done.min(data.len()));
    }
    probe.reg_write32(F4_CR, F4_CR_LOCK)?;
    Ok(())
}

fn verify(
    probe: &mut StLink,
    addr: u32,
    data: &[u8],
    progress: &mut dyn FlashProgress,
) -> Result<(), StLinkError> {
    progress.verifying(data.len());
    let mut buf = vec![0u8; VERIFY_CHUNK];
    let mut done = 0usize;
    while done < data.len() {
        let n = (data.len() - done).min(VERIFY_CHUNK);
        probe.mem_read(addr + done as u32, &mut buf[..n])?;
        if buf[..n] != data[done..done + n] {
            for (i, (read, wrote)) in buf[..n].iter().zip(&data[done..done + n]).enumerate() {
                if read != wrote {
                    return Err(StLinkError::VerifyMismatch {
                        addr: addr + (done + i) as u32,
                        wrote: *wrote,
                        read: *read,
                    });
                }
            }
        }
        done += n;
        progress.progress(done);
    }
    Ok(())
}

struct Sector {
    index: u32,
    base: u32,
    size: u32,
}

// F2/F4 layout: 4 x 16 KiB, 1 x 64 KiB, then 128 KiB sectors.
fn f4_sectors(flash_size: u32) -> Vec<Sector> {
    let mut sectors = Vec::new();
    let mut base = 0u32;
    let mut index = 0u32;
    while base < flash_size {
        let size = match index {
            0..=3 => 16 * 1024,
            4 => 64 * 1024,
            _ => 128 * 1024,
        };
        sectors.push(Sector { index, base, size });
        base += size;
        index += 1;
    }
    sectors
}

fn f1_unlock(probe: &mut StLink) -> Result<(), StLinkError> {
    if probe.reg_read32(F1_CR)? & F1_CR_LOCK != 0 {
        probe.reg_write32(F1_KEYR, KEY1)?;
        probe.reg_write32(F1_KEYR, KEY2)?;
        if probe.reg_read32(F1_CR)? & F1_CR_LOCK != 0 {
            return Err(StLinkError::Protocol("flash controller stayed locked".into()));
        }
    }
    Ok(())
}

fn f4_unlock(probe: &mut StLink) -> Result<(), StLinkError> {
    if probe.reg_read32(F4_CR)? & F4_CR_LOCK != 0 {
        probe.reg_write32(F4_KEYR, KEY1)?;
        probe.reg_write32(F4_KEYR, KEY2)?;
        if probe.reg_read32(F4_CR)? & F4_CR_LOCK != 0 {
            return Err(StLinkError::Protocol("flash controller stayed locked".into()));
        }
    }
    Ok(())
}

fn wait_f1(probe: &mut StLink, timeout: Duration, ctx_addr: u32) -> Result<u32, StLinkError> {
    let start = Instant::now();
    loop {
        let sr = probe.reg_read32(F1_SR)?;
        if sr & F1Sr::BSY.bits() == 0 {
            return Ok(sr);
        }
        if start.elapsed() > timeout {
            return Err(StLinkError::FlashTimeout(ctx_addr));
        }
    }
}

fn wait_f4(probe: &mut StLink, timeout: Duration, ctx_addr: u32) -> Result<u32, StLinkError> {
    let start = Instant::now();
    loop {
        let sr = probe.reg_read32(F4_SR)?;
        if sr & F4Sr::BSY.bits() == 0 {
            return Ok(sr);
        }
        if start.elapsed() > timeout {
            return Err(StLinkError::FlashTimeout(ctx_addr));
        }
    }
}

fn check_f1_errors(sr: u32) -> Result<(), StLinkError> {
    if sr & (F1Sr::PGERR | F1Sr::WRPRTERR).bits() != 0 {
        return Err(StLinkError::FlashErrors(sr));
    }
    Ok(())
}

fn check_f4_errors(sr: u32) -> Result<(), StLinkError> {
    let errors = F4Sr::OPERR | F4Sr::WRPERR | F4Sr::PGAERR | F4Sr::PGPERR | F4Sr::PGSERR;
    if sr & errors.bits() != 0 {
        return Err(StLinkError::FlashErrors(sr));
    }
    Ok(())
}
