//! USB bulk transport for V2 and V2-1 probes.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out};
use nusb::{Endpoint, MaybeFuture};

use stflash_core::SerialFilter;

use crate::constants::{CMD_LEN, PID_V2, PID_V21, USB_VID};
use crate::error::StLinkError;
use crate::probe::Transport;

const TIMEOUT: Duration = Duration::from_secs(3);

const EP_IN: u8 = 0x81;
// V2 takes commands on endpoint 2; V2-1 moved them to endpoint 1.
const EP_OUT_V2: u8 = 0x02;
const EP_OUT_V21: u8 = 0x01;

pub(crate) struct UsbTransport {
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
}

fn usb_err(e: impl std::fmt::Display) -> StLinkError {
    StLinkError::Usb(e.to_string())
}

impl UsbTransport {
    /// Find and claim the first ST-Link that passes the serial filter.
    pub fn open(filter: Option<&SerialFilter>) -> Result<Self, StLinkError> {
        let devices = nusb::list_devices().wait().map_err(usb_err)?;

        let mut selected = None;
        for info in devices {
            if info.vendor_id() != USB_VID || !matches!(info.product_id(), PID_V2 | PID_V21) {
                continue;
            }
            if let Some(filter) = filter {
                let serial = info.serial_number().unwrap_or("");
                if !filter.matches(serial.as_bytes()) {
                    log::debug!("skipping ST-Link with serial {serial:?}");
                    continue;
                }
            }
            selected = Some(info);
            break;
        }
        let info = selected.ok_or(StLinkError::ProbeNotFound)?;

        log::info!(
            "opening ST-Link {:04x}:{:04x} at bus {} address {}",
            info.vendor_id(),
            info.product_id(),
            info.busnum(),
            info.device_address()
        );

        let device = info.open().wait().map_err(usb_err)?;
        let interface = device.claim_interface(0).wait().map_err(usb_err)?;

        let out_addr = if info.product_id() == PID_V21 {
            EP_OUT_V21
        } else {
            EP_OUT_V2
        };
        let out_ep = interface
            .endpoint::<Bulk, Out>(out_addr)
            .map_err(usb_err)?;
        let in_ep = interface.endpoint::<Bulk, In>(EP_IN).map_err(usb_err)?;

        Ok(Self { out_ep, in_ep })
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<(), StLinkError> {
        self.out_ep.submit(Buffer::from(data.to_vec()));
        let completion = self
            .out_ep
            .wait_next_complete(TIMEOUT)
            .ok_or_else(|| StLinkError::Usb("bulk write timed out".into()))?;
        completion.status.map_err(usb_err)?;
        Ok(())
    }

    fn bulk_in(&mut self, len: usize) -> Result<Vec<u8>, StLinkError> {
        // IN requests must be a whole number of packets.
        let packet = self.in_ep.max_packet_size();
        let request = len.div_ceil(packet) * packet;

        self.in_ep.submit(Buffer::new(request));
        let completion = self
            .in_ep
            .wait_next_complete(TIMEOUT)
            .ok_or_else(|| StLinkError::Usb("bulk read timed out".into()))?;
        completion.status.map_err(usb_err)?;

        if completion.actual_len < len {
            return Err(StLinkError::Protocol(format!(
                "short read: wanted {len} bytes, got {}",
                completion.actual_len
            )));
        }
        Ok(completion.buffer[..len].to_vec())
    }
}

impl Transport for UsbTransport {
    fn command(
        &mut self,
        cmd: &[u8],
        data_out: &[u8],
        read_len: usize,
    ) -> Result<Vec<u8>, StLinkError> {
        debug_assert!(cmd.len() <= CMD_LEN);
        debug_assert!(data_out.is_empty() || read_len == 0);

        let mut block = [0u8; CMD_LEN];
        block[..cmd.len()].copy_from_slice(cmd);
        self.bulk_out(&block)?;

        if !data_out.is_empty() {
            self.bulk_out(data_out)?;
        }
        if read_len > 0 {
            return self.bulk_in(read_len);
        }
        Ok(Vec::new())
    }
}
