//! SAM-BA bootloader session.
//!
//! A session owns the transport and the response queue. Every reply-bearing
//! command registers a pending request, then the session pumps the port
//! (read a chunk, feed the queue, expire deadlines) until that request
//! settles. Commands without a reply complete once the write has drained.
//!
//! ## Example
//!
//! ```rust,no_run
//! use samflash::{NativePort, SambaSession, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyACM0", 921600))?;
//!     let mut session = SambaSession::new(port);
//!
//!     let version = session.initialize()?;
//!     println!("SAM-BA {version}, chip id {:#010x}", session.chip_id().unwrap_or(0));
//!
//!     let word = session.read_word(0x0008_0000)?;
//!     println!("first flash word: {word:#010x}");
//!     Ok(())
//! }
//! ```

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace, warn};
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::{Command, Reply, decode_version, decode_word};
use crate::protocol::response::{ReadMode, RequestId, ResponseQueue};

/// Address of the CHIPID_CIDR register.
pub const CHIPID_CIDR: u32 = 0x400E_0940;

/// Deadline applied to strict reads unless overridden.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Deadline for each chunk read back during verification.
pub const VERIFY_CHUNK_TIMEOUT: Duration = Duration::from_millis(50);

/// Bytes compared per read-back during verification.
const VERIFY_CHUNK_SIZE: usize = 32;

/// Port read timeout while pumping replies.
const PUMP_INTERVAL: Duration = Duration::from_millis(5);

/// Scratch buffer size for a single port read.
const READ_CHUNK_SIZE: usize = 512;

/// Addresses of the words the boot ROM reads on `G`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpData {
    /// Word that receives the initial stack pointer.
    pub stack: u32,
    /// Word that receives the entry point; also the `G` operand.
    pub jump: u32,
}

/// A connection to the SAM-BA monitor over a [`Port`].
pub struct SambaSession<P: Port> {
    port: P,
    queue: ResponseQueue,
    read_timeout: Duration,
    chip_id: Option<u32>,
    version: Option<String>,
    jump: Option<JumpData>,
}

impl<P: Port> SambaSession<P> {
    /// Create a session over an open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            queue: ResponseQueue::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            chip_id: None,
            version: None,
            jump: None,
        }
    }

    /// Override the strict read deadline.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Strict read deadline in use.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The underlying port, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Close the underlying port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    /// Chip identifier read by [`initialize`](Self::initialize).
    pub fn chip_id(&self) -> Option<u32> {
        self.chip_id
    }

    /// Monitor version read by [`initialize`](Self::initialize).
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Switch the monitor to binary mode, then read the chip id and version.
    ///
    /// Returns the version string.
    pub fn initialize(&mut self) -> Result<String> {
        debug!("Entering binary mode on {}", self.port.name());
        self.port.clear_buffers()?;
        self.exchange(Command::EnterBinaryMode)?;

        let chip_id = self.read_word(CHIPID_CIDR)?;
        debug!("Chip id: {chip_id:#010x}");
        self.chip_id = Some(chip_id);

        let version = self.get_version()?;
        debug!("Monitor version: {}", version.trim_end());
        self.version = Some(version.clone());
        Ok(version)
    }

    /// Read the monitor version string.
    ///
    /// Whatever arrives within the collection window is returned, possibly
    /// empty.
    pub fn get_version(&mut self) -> Result<String> {
        let reply = self.exchange(Command::GetVersion)?;
        Ok(decode_version(&reply))
    }

    /// Read one byte.
    pub fn read_byte(&mut self, addr: u32) -> Result<u8> {
        let reply = self.exchange(Command::ReadByte { addr })?;
        Ok(reply[0])
    }

    /// Read one little-endian word.
    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        self.read_word_with_timeout(addr, self.read_timeout)
    }

    /// Read one little-endian word with an explicit deadline.
    pub fn read_word_with_timeout(&mut self, addr: u32, timeout: Duration) -> Result<u32> {
        let cmd = Command::ReadWord { addr };
        let reply = self.exchange_with(cmd, 4, timeout, ReadMode::Strict)?;
        decode_word(&reply)
    }

    /// Write one word.
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<()> {
        self.send(&Command::WriteWord { addr, value })
    }

    /// Read a block of bytes.
    pub fn read_bytes(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.read_bytes_with_timeout(addr, len, self.read_timeout)
    }

    /// Read a block of bytes with an explicit deadline.
    pub fn read_bytes_with_timeout(
        &mut self,
        addr: u32,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let cmd = Command::ReadBytes {
            addr,
            len: block_len(len)?,
        };
        self.exchange_with(cmd, len, timeout, ReadMode::Strict)
    }

    /// Store `data` as a sequence of word writes.
    ///
    /// A trailing partial word is padded with `0xFF`.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut word_addr = addr;
        for chunk in data.chunks(4) {
            let mut word = [0xFF; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_word(word_addr, LittleEndian::read_u32(&word))?;
            word_addr = word_addr.wrapping_add(4);
        }
        Ok(())
    }

    /// Store `data` with a single `S` header followed by the raw payload.
    ///
    /// The header and the payload are drained as separate writes.
    pub fn write_bytes_bulk(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.send(&Command::WriteBytes {
            addr,
            len: block_len(data.len())?,
        })?;
        trace!("> {} payload bytes", data.len());
        self.port.write_all_bytes(data)
    }

    /// Compare device memory at `addr` with `expected`.
    ///
    /// Returns `Ok(false)` on the first mismatching chunk or on a read
    /// timeout; transport errors are propagated.
    pub fn verify_bytes(&mut self, addr: u32, expected: &[u8]) -> Result<bool> {
        for (i, chunk) in expected.chunks(VERIFY_CHUNK_SIZE).enumerate() {
            let chunk_addr = addr.wrapping_add((i * VERIFY_CHUNK_SIZE) as u32);
            let actual =
                match self.read_bytes_with_timeout(chunk_addr, chunk.len(), VERIFY_CHUNK_TIMEOUT) {
                    Ok(actual) => actual,
                    Err(e) if e.is_timeout() => {
                        warn!("Verify read at {chunk_addr:#010x} timed out");
                        return Ok(false);
                    },
                    Err(e) => return Err(e),
                };
            if actual != chunk {
                warn!(
                    "Verify mismatch at {chunk_addr:#010x}: expected {}, read {}",
                    hex(chunk),
                    hex(&actual)
                );
                return Ok(false);
            }
            trace!("Verified {} bytes at {chunk_addr:#010x}", chunk.len());
        }
        Ok(true)
    }

    /// Record where the boot ROM expects the stack and entry words for `G`.
    pub fn set_jump_data(&mut self, stack: u32, jump: u32) {
        self.jump = Some(JumpData { stack, jump });
    }

    /// Jump data set by [`set_jump_data`](Self::set_jump_data).
    pub fn jump_data(&self) -> Option<JumpData> {
        self.jump
    }

    /// Start code at `entry`.
    ///
    /// Writes `entry` to the jump word and `entry + 1` (Thumb) to the stack
    /// word, then issues `G` with the jump word address.
    pub fn go(&mut self, entry: u32) -> Result<()> {
        let jump = self.jump.ok_or_else(|| {
            Error::Config("jump data must be set before starting code".to_string())
        })?;
        self.write_word(jump.jump, entry)?;
        self.write_word(jump.stack, entry.wrapping_add(1))?;
        self.send(&Command::Go { addr: jump.jump })
    }

    /// Send a command and wait for the reply its shape implies.
    fn exchange(&mut self, cmd: Command) -> Result<Vec<u8>> {
        match cmd.reply() {
            Reply::None => self.send(&cmd).map(|()| Vec::new()),
            Reply::Fixed(len) => self.exchange_with(cmd, len, self.read_timeout, ReadMode::Strict),
            Reply::Text { max_len, window } => {
                self.exchange_with(cmd, max_len, window, ReadMode::Lenient)
            },
        }
    }

    fn exchange_with(
        &mut self,
        cmd: Command,
        len: usize,
        timeout: Duration,
        mode: ReadMode,
    ) -> Result<Vec<u8>> {
        self.send(&cmd)?;
        let id = self.queue.enqueue(len, Instant::now() + timeout, mode);
        self.wait_for(id)
    }

    fn send(&mut self, cmd: &Command) -> Result<()> {
        let bytes = cmd.encode();
        trace!("> {}", String::from_utf8_lossy(&bytes));
        self.port.write_all_bytes(&bytes)
    }

    /// Pump the port until `id` settles.
    fn wait_for(&mut self, id: RequestId) -> Result<Vec<u8>> {
        if self.port.timeout() != PUMP_INTERVAL {
            self.port.set_timeout(PUMP_INTERVAL)?;
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(outcome) = self.queue.take(id) {
                if let Ok(reply) = &outcome {
                    trace!("< {} bytes", reply.len());
                }
                return outcome;
            }

            match self.port.read(&mut chunk) {
                Ok(n) => self.queue.feed(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => {
                    self.queue.abandon(id);
                    return Err(Error::Transport(e));
                },
            }
            self.queue.expire(Instant::now());
        }
    }
}

fn block_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::InvalidInput(format!("block of {len} bytes is too large")))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
