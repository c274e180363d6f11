//! ST-Link/V1 SCSI-generic bridge transport.
//!
//! The V1 probe enumerates as USB mass storage; its vendor commands ride
//! inside SCSI CDBs issued through the Linux `sg` driver. One transaction
//! is one `SG_IO` ioctl: the command block is the CDB, the data stage maps
//! onto the transfer buffer.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use crate::error::StLinkError;
use crate::probe::Transport;

// The V1 firmware takes 10-byte CDBs.
const CDB_LEN: usize = 10;

const SG_IO: libc::c_ulong = 0x2285;
const SG_DXFER_NONE: i32 = -1;
const SG_DXFER_TO_DEV: i32 = -2;
const SG_DXFER_FROM_DEV: i32 = -3;
const SG_TIMEOUT_MS: u32 = 3000;
const SENSE_LEN: u8 = 32;

/// Mirrors `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
struct SgIoHdr {
    interface_id: i32,
    dxfer_direction: i32,
    cmd_len: u8,
    mx_sb_len: u8,
    iovec_count: u16,
    dxfer_len: u32,
    dxferp: *mut libc::c_void,
    cmdp: *mut u8,
    sbp: *mut u8,
    timeout: u32,
    flags: u32,
    pack_id: i32,
    usr_ptr: *mut libc::c_void,
    status: u8,
    masked_status: u8,
    msg_status: u8,
    sb_len_wr: u8,
    host_status: u16,
    driver_status: u16,
    resid: i32,
    duration: u32,
    info: u32,
}

pub(crate) struct BridgeTransport {
    file: File,
}

impl BridgeTransport {
    /// Open the user-supplied `/dev/sgX` node.
    pub fn open(path: &Path) -> Result<Self, StLinkError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        log::info!("opened V1 bridge at {}", path.display());
        Ok(Self { file })
    }

    fn sg_io(
        &mut self,
        cdb: &mut [u8; CDB_LEN],
        direction: i32,
        data: *mut libc::c_void,
        len: u32,
    ) -> Result<(), StLinkError> {
        let mut sense = [0u8; SENSE_LEN as usize];
        let mut hdr = SgIoHdr {
            interface_id: 'S' as i32,
            dxfer_direction: direction,
            cmd_len: CDB_LEN as u8,
            mx_sb_len: SENSE_LEN,
            iovec_count: 0,
            dxfer_len: len,
            dxferp: data,
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: SG_TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in the header outlives the ioctl, which is
        // synchronous.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO, &mut hdr) };
        if rc < 0 {
            return Err(StLinkError::Bridge(std::io::Error::last_os_error()));
        }
        if hdr.status != 0 || hdr.host_status != 0 || hdr.driver_status != 0 {
            return Err(StLinkError::Protocol(format!(
                "SCSI transfer failed: status 0x{:02x}, host 0x{:02x}, driver 0x{:02x}",
                hdr.status, hdr.host_status, hdr.driver_status
            )));
        }
        Ok(())
    }
}

impl Transport for BridgeTransport {
    fn command(
        &mut self,
        cmd: &[u8],
        data_out: &[u8],
        read_len: usize,
    ) -> Result<Vec<u8>, StLinkError> {
        if cmd.len() > CDB_LEN {
            return Err(StLinkError::Protocol(format!(
                "command of {} bytes does not fit the bridge CDB",
                cmd.len()
            )));
        }
        debug_assert!(data_out.is_empty() || read_len == 0);

        let mut cdb = [0u8; CDB_LEN];
        cdb[..cmd.len()].copy_from_slice(cmd);

        if read_len > 0 {
            let mut buf = vec![0u8; read_len];
            self.sg_io(
                &mut cdb,
                SG_DXFER_FROM_DEV,
                buf.as_mut_ptr().cast(),
                read_len as u32,
            )?;
            Ok(buf)
        } else if !data_out.is_empty() {
            let mut out = data_out.to_vec();
            self.sg_io(
                &mut cdb,
                SG_DXFER_TO_DEV,
                out.as_mut_ptr().cast(),
                out.len() as u32,
            )?;
            Ok(Vec::new())
        } else {
            self.sg_io(&mut cdb, SG_DXFER_NONE, ptr::null_mut(), 0)?;
            Ok(Vec::new())
        }
    }
}
