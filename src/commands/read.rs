//! Read command implementation.

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use stflash_core::{region, Error, Region, Result, Session};

/// Transfer chunk, matching the probe's block ceiling.
const READ_CHUNK: usize = 1024;

/// Stream memory starting at `addr` into `file`. A `size` of zero reads
/// the full region containing the address.
pub fn run(session: &mut Session, file: &Path, addr: u32, size: u32) -> Result<()> {
    let (region, len) = region::resolve_read_len(session.target(), addr, size);
    if size == 0 {
        match region {
            Region::Flash => log::info!("no size given, reading the full {len} byte flash"),
            Region::Sram => log::info!("no size given, reading the full {len} byte SRAM"),
            Region::OutOfRange => log::warn!(
                "address 0x{addr:08x} is outside the target's flash and SRAM, reading nothing"
            ),
        }
    }

    let data = read_with_progress(session, addr, len as usize)?;

    let mut out = File::create(file)
        .map_err(|e| Error::TransferFailed(format!("cannot create {}: {e}", file.display())))?;
    out.write_all(&data)
        .map_err(|e| Error::TransferFailed(format!("cannot write {}: {e}", file.display())))?;

    println!(
        "Read {} bytes from 0x{addr:08x} into {}",
        data.len(),
        file.display()
    );
    Ok(())
}

fn read_with_progress(session: &mut Session, addr: u32, total: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; total];

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                 {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) Reading",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut offset = 0usize;
    while offset < total {
        let n = (total - offset).min(READ_CHUNK);
        session.read_mem(addr + offset as u32, &mut data[offset..offset + n])?;
        offset += n;
        pb.set_position(offset as u64);
    }
    pb.finish();
    Ok(data)
}
