//! CLI argument parsing and dialect normalization.
//!
//! Two historical command-line shapes feed the same operation descriptor.
//! The V1-era shape names the mass-storage bridge device node as its first
//! positional argument; the V2-era shape omits it. The shapes are told
//! apart by positional token count alone, so parsing runs in two phases:
//! clap accepts the flags, the sub-command and a loose positional list,
//! then [`Cli::normalize`] classifies the count and builds the typed
//! operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stflash_core::{Error, ProbeSelector, Result, SerialFilter};

#[derive(Parser)]
#[command(name = "stflash")]
#[command(author, version, about = "ST-Link flash programmer", long_about = None)]
pub struct Cli {
    /// Verbose protocol logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Reset the target before and after the operation
    #[arg(long, global = true)]
    pub reset: bool,

    /// Probe serial filter, hex; the trailing 13 bytes are used
    #[arg(long, global = true, value_name = "HEX")]
    pub serial: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read target memory into a file
    Read {
        /// `[device] <file> <addr> [<size>]` - four tokens select the V1
        /// bridge shape
        #[arg(value_name = "ARG")]
        tokens: Vec<String>,
    },
    /// Write a file into flash or SRAM
    Write {
        /// `[device] <file> <addr>` - three tokens select the V1 bridge
        /// shape
        #[arg(value_name = "ARG")]
        tokens: Vec<String>,
    },
    /// Mass-erase the target's flash
    Erase {
        /// V1 bridge device node; omit for direct USB
        #[arg(value_name = "DEVICE")]
        device: Option<String>,
    },
}

/// How chatty the run should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Standard,
    Debug,
}

/// What one invocation does, normalized across both CLI shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Write { file: PathBuf, addr: u32 },
    Read { file: PathBuf, addr: u32, size: u32 },
    Erase,
}

/// Everything one invocation needs, immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub probe: ProbeSelector,
    pub reset: bool,
    pub verbosity: Verbosity,
}

impl Cli {
    /// Classify the dialect by token count and build the operation.
    pub fn normalize(&self) -> Result<Operation> {
        let serial = match &self.serial {
            Some(s) => Some(SerialFilter::parse(s)?),
            None => None,
        };

        let (kind, device) = match &self.command {
            Commands::Erase { device } => (OpKind::Erase, device.clone()),
            Commands::Read { tokens } => match tokens.as_slice() {
                [device, file, addr, size] => (
                    OpKind::Read {
                        file: file.into(),
                        addr: parse_hex(addr)?,
                        size: parse_hex(size)?,
                    },
                    Some(device.clone()),
                ),
                [file, addr, size] => (
                    OpKind::Read {
                        file: file.into(),
                        addr: parse_hex(addr)?,
                        size: parse_hex(size)?,
                    },
                    None,
                ),
                // No size token: 0 is the "infer from the region" sentinel.
                [file, addr] => (
                    OpKind::Read {
                        file: file.into(),
                        addr: parse_hex(addr)?,
                        size: 0,
                    },
                    None,
                ),
                _ => {
                    return Err(Error::InvalidArguments(format!(
                        "read takes 2 to 4 arguments, got {}",
                        tokens.len()
                    )))
                }
            },
            Commands::Write { tokens } => match tokens.as_slice() {
                [device, file, addr] => (
                    OpKind::Write {
                        file: file.into(),
                        addr: parse_hex(addr)?,
                    },
                    Some(device.clone()),
                ),
                [file, addr] => (
                    OpKind::Write {
                        file: file.into(),
                        addr: parse_hex(addr)?,
                    },
                    None,
                ),
                _ => {
                    return Err(Error::InvalidArguments(format!(
                        "write takes 2 or 3 arguments, got {}",
                        tokens.len()
                    )))
                }
            },
        };

        let probe = match device {
            Some(path) => ProbeSelector::Bridge(path.into()),
            None => ProbeSelector::Usb(serial),
        };

        Ok(Operation {
            kind,
            probe,
            reset: self.reset,
            verbosity: if self.debug {
                Verbosity::Debug
            } else {
                Verbosity::Standard
            },
        })
    }
}

/// Parse unsigned hex, with or without a `0x` prefix.
fn parse_hex(s: &str) -> Result<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16)
        .map_err(|e| Error::InvalidArguments(format!("invalid hex value '{s}': {e}")))
}

/// Usage synopsis, printed on stdout when normalization fails.
pub fn print_usage() {
    println!("usage: stflash [--debug] [--reset] [--serial <hex>] read  [/dev/sgX] <file> <addr> [<size>]");
    println!("       stflash [--debug] [--reset] [--serial <hex>] write [/dev/sgX] <file> <addr>");
    println!("       stflash [--debug] [--serial <hex>] erase [/dev/sgX]");
    println!("       <addr>, <size> and <hex> are hexadecimal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<Operation> {
        let mut argv = vec!["stflash"];
        argv.extend(args);
        Cli::try_parse_from(argv).expect("clap accepts").normalize()
    }

    #[test]
    fn modern_write_parses() {
        let op = parse(&["write", "firmware.bin", "08000000"]).unwrap();
        assert_eq!(
            op.kind,
            OpKind::Write {
                file: PathBuf::from("firmware.bin"),
                addr: 0x0800_0000,
            }
        );
        assert_eq!(op.probe, ProbeSelector::Usb(None));
        assert!(!op.reset);
        assert_eq!(op.verbosity, Verbosity::Standard);
    }

    #[test]
    fn legacy_write_takes_the_device_node_first() {
        let op = parse(&["write", "/dev/sg0", "firmware.bin", "08000000"]).unwrap();
        assert_eq!(op.probe, ProbeSelector::Bridge(PathBuf::from("/dev/sg0")));
        assert_eq!(
            op.kind,
            OpKind::Write {
                file: PathBuf::from("firmware.bin"),
                addr: 0x0800_0000,
            }
        );
    }

    #[test]
    fn legacy_read_is_selected_by_count() {
        let op = parse(&["read", "/dev/sg1", "dump.bin", "08000000", "1000"]).unwrap();
        assert_eq!(op.probe, ProbeSelector::Bridge(PathBuf::from("/dev/sg1")));
        assert_eq!(
            op.kind,
            OpKind::Read {
                file: PathBuf::from("dump.bin"),
                addr: 0x0800_0000,
                size: 0x1000,
            }
        );
    }

    #[test]
    fn modern_read_without_size_keeps_the_sentinel() {
        let op = parse(&["read", "dump.bin", "08000000"]).unwrap();
        assert_eq!(
            op.kind,
            OpKind::Read {
                file: PathBuf::from("dump.bin"),
                addr: 0x0800_0000,
                size: 0,
            }
        );
        assert_eq!(op.probe, ProbeSelector::Usb(None));
    }

    #[test]
    fn modern_read_with_size_parses_hex() {
        let op = parse(&["read", "dump.bin", "20000000", "0x400"]).unwrap();
        assert_eq!(
            op.kind,
            OpKind::Read {
                file: PathBuf::from("dump.bin"),
                addr: 0x2000_0000,
                size: 0x400,
            }
        );
    }

    #[test]
    fn erase_needs_no_file_or_address() {
        let op = parse(&["erase"]).unwrap();
        assert_eq!(op.kind, OpKind::Erase);
        assert_eq!(op.probe, ProbeSelector::Usb(None));
    }

    #[test]
    fn legacy_erase_takes_the_device_node() {
        let op = parse(&["erase", "/dev/sg0"]).unwrap();
        assert_eq!(op.kind, OpKind::Erase);
        assert_eq!(op.probe, ProbeSelector::Bridge(PathBuf::from("/dev/sg0")));
    }

    #[test]
    fn reset_and_overlong_serial_normalize() {
        let op = parse(&[
            "--reset",
            "--serial",
            "1122334455667788990011223344",
            "erase",
        ])
        .unwrap();
        assert!(op.reset);
        let ProbeSelector::Usb(Some(filter)) = op.probe else {
            panic!("expected a USB selector with a filter");
        };
        // 14 bytes encoded, truncated to the trailing 13.
        assert_eq!(
            filter.as_bytes(),
            &[0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0x00, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn debug_flag_raises_verbosity() {
        let op = parse(&["--debug", "erase"]).unwrap();
        assert_eq!(op.verbosity, Verbosity::Debug);
    }

    #[test]
    fn wrong_token_counts_are_invalid() {
        assert!(matches!(
            parse(&["read", "dump.bin"]),
            Err(Error::InvalidArguments(_))
        ));
        assert!(matches!(
            parse(&["read", "a", "b", "c", "d", "e"]),
            Err(Error::InvalidArguments(_))
        ));
        assert!(matches!(
            parse(&["write", "firmware.bin"]),
            Err(Error::InvalidArguments(_))
        ));
        assert!(matches!(
            parse(&["write", "a", "b", "c", "d"]),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn malformed_hex_is_invalid_arguments() {
        assert!(matches!(
            parse(&["write", "firmware.bin", "080000zz"]),
            Err(Error::InvalidArguments(_))
        ));
    }

    #[test]
    fn odd_serial_is_invalid_serial() {
        assert!(matches!(
            parse(&["--serial", "abc", "erase"]),
            Err(Error::InvalidSerial(_))
        ));
    }
}
