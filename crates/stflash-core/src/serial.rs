//! Probe serial filter decoding.

use crate::error::{Error, Result};

/// Length of an ST-Link serial number, in bytes.
pub const SERIAL_LEN: usize = 13;

/// A fixed-length probe serial filter decoded from the `--serial` argument.
///
/// Decoding walks the hex string from its end backward: the last pair of
/// digits becomes the last byte of the buffer, and so on toward the front.
/// Shorter input leaves leading zero bytes; input encoding more than 13
/// bytes keeps only its trailing 13. The truncation is a historical quirk
/// of this tool's CLI and is kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFilter([u8; SERIAL_LEN]);

impl SerialFilter {
    /// Decode a hex string into a filter.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() % 2 != 0 {
            return Err(Error::InvalidSerial(format!(
                "hex length must be a multiple of two, got {} characters",
                s.len()
            )));
        }

        let mut buf = [0u8; SERIAL_LEN];
        for (i, pair) in s.as_bytes().rchunks(2).take(SERIAL_LEN).enumerate() {
            buf[SERIAL_LEN - 1 - i] = hex_digit(pair[0])? << 4 | hex_digit(pair[1])?;
        }
        Ok(Self(buf))
    }

    /// The decoded 13 bytes.
    pub fn as_bytes(&self) -> &[u8; SERIAL_LEN] {
        &self.0
    }

    /// True when this filter selects a probe with the given USB serial
    /// descriptor. Longer descriptors match on their trailing 13 bytes,
    /// mirroring the fixed-width compare of the historical tool; shorter
    /// ones must equal the buffer's tail with the lead bytes zero.
    pub fn matches(&self, descriptor: &[u8]) -> bool {
        if descriptor.len() >= SERIAL_LEN {
            descriptor[descriptor.len() - SERIAL_LEN..] == self.0
        } else {
            let split = SERIAL_LEN - descriptor.len();
            self.0[..split].iter().all(|&b| b == 0) && self.0[split..] == *descriptor
        }
    }
}

fn hex_digit(d: u8) -> Result<u8> {
    match d {
        b'0'..=b'9' => Ok(d - b'0'),
        b'a'..=b'f' => Ok(d - b'a' + 10),
        b'A'..=b'F' => Ok(d - b'A' + 10),
        _ => Err(Error::InvalidSerial(format!(
            "invalid hex digit '{}'",
            d as char
        ))),
    }
}
