//! Terminal status and control word encoding
//!
//! Status word (returned by `wait_device`):
//!
//! ```text
//!  15        8 7     4 3   2 1   0
//! +-----------+-------+-----+-----+
//! |   char    |   0   | XMIT| RECV|
//! +-----------+-------+-----+-----+
//! ```
//!
//! Control word (passed to `device_output`):
//!
//! ```text
//!  15        8 7     3   2    1     0
//! +-----------+-------+----+----+------+
//! |   char    |   0   | XI | RI | SEND |
//! +-----------+-------+----+----+------+
//! ```

/// Device is idle / ready
pub const DEV_READY: u32 = 0;
/// Device holds data (receive) or is working (transmit)
pub const DEV_BUSY: u32 = 1;
/// Device reported an error
pub const DEV_ERROR: u32 = 2;

/// Transmit the character in bits 8..16
pub const CTRL_XMIT_CHAR: u32 = 0x1;
/// Enable receive interrupts
pub const CTRL_RECV_INT: u32 = 0x2;
/// Enable transmit-ready interrupts
pub const CTRL_XMIT_INT: u32 = 0x4;

/// Receive status field of a terminal status word
pub const fn stat_recv(status: u32) -> u32 {
    status & 0x3
}

/// Transmit status field of a terminal status word
pub const fn stat_xmit(status: u32) -> u32 {
    (status >> 2) & 0x3
}

/// Received character of a terminal status word
pub const fn stat_char(status: u32) -> u8 {
    ((status >> 8) & 0xff) as u8
}

/// Build a terminal status word
pub const fn status(recv: u32, xmit: u32, ch: u8) -> u32 {
    (recv & 0x3) | ((xmit & 0x3) << 2) | ((ch as u32) << 8)
}

/// Attach a character to a control word
pub const fn ctrl_char(ctrl: u32, ch: u8) -> u32 {
    ctrl | ((ch as u32) << 8)
}

/// Character carried by a control word
pub const fn ctrl_get_char(ctrl: u32) -> u8 {
    ((ctrl >> 8) & 0xff) as u8
}
