//! ST-Link protocol constants.

/// ST-Microelectronics USB vendor id.
pub const USB_VID: u16 = 0x0483;
/// ST-Link/V2 product id.
pub const PID_V2: u16 = 0x3748;
/// ST-Link/V2-1 product id (Nucleo boards).
pub const PID_V21: u16 = 0x374b;

/// Every command travels in a fixed-size block.
pub const CMD_LEN: usize = 16;

/// Maximum bytes per 32-bit block transfer.
pub const MAX_XFER: usize = 1024;

/// Maximum bytes per 8-bit block transfer (one USB packet).
pub const MAX_XFER_8BIT: usize = 64;

pub mod commands {
    // Common commands.
    pub const GET_VERSION: u8 = 0xf1;
    pub const DEBUG_COMMAND: u8 = 0xf2;
    pub const DFU_COMMAND: u8 = 0xf3;
    pub const GET_CURRENT_MODE: u8 = 0xf5;
    pub const GET_TARGET_VOLTAGE: u8 = 0xf7;

    // Commands to exit other modes.
    pub const DFU_EXIT: u8 = 0x07;

    // DEBUG_COMMAND sub-commands.
    pub const DEBUG_GET_STATUS: u8 = 0x01;
    pub const DEBUG_FORCE_DEBUG: u8 = 0x02;
    pub const DEBUG_APIV1_RESET_SYS: u8 = 0x03;
    pub const DEBUG_READ_MEM_32BIT: u8 = 0x07;
    pub const DEBUG_WRITE_MEM_32BIT: u8 = 0x08;
    pub const DEBUG_RUN_CORE: u8 = 0x09;
    pub const DEBUG_WRITE_MEM_8BIT: u8 = 0x0d;
    pub const DEBUG_APIV1_ENTER: u8 = 0x20;
    pub const DEBUG_EXIT: u8 = 0x21;

    // From version 2 of the API.
    pub const DEBUG_APIV2_ENTER: u8 = 0x30;
    pub const DEBUG_APIV2_RESET_SYS: u8 = 0x32;
    pub const DEBUG_DRIVE_NRST: u8 = 0x3c;
    pub const DEBUG_WRITE_MEM_16BIT: u8 = 0x48; // From V2J26

    // Parameters for the enter commands.
    pub const DEBUG_ENTER_SWD: u8 = 0xa3;

    // Parameters for DEBUG_DRIVE_NRST.
    pub const DEBUG_DRIVE_NRST_PULSE: u8 = 0x02;
}

// GET_CURRENT_MODE responses.
pub const DEV_DFU_MODE: u8 = 0x00;
pub const DEV_MASS_MODE: u8 = 0x01;
pub const DEV_DEBUG_MODE: u8 = 0x02;

// DEBUG_GET_STATUS responses.
pub const CORE_RUNNING: u8 = 0x80;
pub const CORE_HALTED: u8 = 0x81;

/// First status byte of an API v2 reply when the command succeeded.
pub const STATUS_JTAG_OK: u8 = 0x80;
