//! SAM-BA command encoding and reply decoding.
//!
//! Every command is a short ASCII string terminated by `#`. Numeric fields
//! are always eight lowercase hex digits, most significant digit first:
//!
//! ```text
//! N#                       enter binary mode     -> 2 bytes (echo)
//! V#                       get version           -> text, variable length
//! w400e0940,#              read word             -> 4 bytes, little-endian
//! W400e0944,00000600#      write word            -> nothing
//! R00080000,00000020#      read bytes            -> 0x20 raw bytes
//! S20001000,00000100#      write bytes header    -> nothing, payload follows
//! G20001000#               go                    -> nothing
//! o400e0940,#              read byte             -> 1 byte
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::time::Duration;

use crate::error::{Error, Result};

/// Length of the reply to the enter-binary-mode command.
pub const BINARY_MODE_ECHO_LEN: usize = 2;

/// Upper bound on the version string reply.
pub const VERSION_MAX_LEN: usize = 128;

/// Window during which version string bytes are collected.
pub const VERSION_WINDOW: Duration = Duration::from_millis(100);

/// A SAM-BA monitor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch the monitor to binary replies (`N#`).
    EnterBinaryMode,
    /// Request the monitor version string (`V#`).
    GetVersion,
    /// Read one byte (`o`).
    ReadByte {
        /// Address to read.
        addr: u32,
    },
    /// Read one 32-bit word (`w`).
    ReadWord {
        /// Address to read.
        addr: u32,
    },
    /// Write one 32-bit word (`W`).
    WriteWord {
        /// Address to write.
        addr: u32,
        /// Value to store.
        value: u32,
    },
    /// Read a block of bytes (`R`).
    ReadBytes {
        /// Start address.
        addr: u32,
        /// Number of bytes.
        len: u32,
    },
    /// Header announcing a raw payload to store (`S`).
    WriteBytes {
        /// Start address.
        addr: u32,
        /// Payload length that follows the header.
        len: u32,
    },
    /// Jump to code (`G`).
    Go {
        /// Address of the jump vector word.
        addr: u32,
    },
}

/// Shape of the reply a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The command is acknowledged by draining the write.
    None,
    /// Exactly this many bytes follow.
    Fixed(usize),
    /// Text of unknown length, collected until a quiet window elapses.
    Text {
        /// Maximum number of bytes accepted.
        max_len: usize,
        /// Collection window.
        window: Duration,
    },
}

impl Command {
    /// Encode the command to the bytes sent on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let text = match *self {
            Self::EnterBinaryMode => "N#".to_string(),
            Self::GetVersion => "V#".to_string(),
            Self::ReadByte { addr } => format!("o{addr:08x},#"),
            Self::ReadWord { addr } => format!("w{addr:08x},#"),
            Self::WriteWord { addr, value } => format!("W{addr:08x},{value:08x}#"),
            Self::ReadBytes { addr, len } => format!("R{addr:08x},{len:08x}#"),
            Self::WriteBytes { addr, len } => format!("S{addr:08x},{len:08x}#"),
            Self::Go { addr } => format!("G{addr:08x}#"),
        };
        text.into_bytes()
    }

    /// The reply this command produces.
    pub fn reply(&self) -> Reply {
        match *self {
            Self::EnterBinaryMode => Reply::Fixed(BINARY_MODE_ECHO_LEN),
            Self::GetVersion => Reply::Text {
                max_len: VERSION_MAX_LEN,
                window: VERSION_WINDOW,
            },
            Self::ReadByte { .. } => Reply::Fixed(1),
            Self::ReadWord { .. } => Reply::Fixed(4),
            Self::ReadBytes { len, .. } => Reply::Fixed(len as usize),
            Self::WriteWord { .. } | Self::WriteBytes { .. } | Self::Go { .. } => Reply::None,
        }
    }
}

/// Decode a 4-byte little-endian word reply.
pub fn decode_word(reply: &[u8]) -> Result<u32> {
    if reply.len() < 4 {
        return Err(Error::InvalidInput(format!(
            "word reply is {} bytes, expected 4",
            reply.len()
        )));
    }
    Ok(LittleEndian::read_u32(&reply[..4]))
}

/// Decode the version string reply.
///
/// The reply is taken as text up to whatever length was collected.
pub fn decode_version(reply: &[u8]) -> String {
    String::from_utf8_lossy(reply).into_owned()
}
