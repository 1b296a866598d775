//! Simulated SAM-BA monitor for unit tests.
//!
//! `SimDevice` implements [`Port`] and answers the ASCII command set the way
//! the boot ROM does. It models the flash array with a page latch, the EEFC
//! command/status registers of every plane, the reset controller, and the
//! RAM assist routine (executed on `G` by copying the programmed parameters).

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::port::Port;
use crate::target::chip::{ChipProfile, WriteStrategy};
use crate::target::eefc::registers::{EefcCommand, FSR_FRDY, PlaneRegisters, RSTC_CR_OFFSET};

/// CHIPID of an ATSAM3X8E.
pub(crate) const SAM3X8E_ID: u32 = 0x285E_0A60;

/// CHIPID of an ATSAME70Q21.
pub(crate) const SAME70Q21_ID: u32 = 0xA102_0E00;

/// Version banner returned for `V#`.
pub(crate) const SIM_VERSION: &[u8] = b"v1.1 Dec 15 2010 19:25:04\n\r";

pub(crate) struct SimDevice {
    profile: ChipProfile,
    rx: VecDeque<u8>,
    line: Vec<u8>,
    payload: Option<(u32, usize)>,
    memory: BTreeMap<u32, u8>,
    latch: BTreeMap<u32, u8>,
    chunk: usize,
    timeout: Duration,
    pub chip_id: u32,
    pub version: Vec<u8>,
    /// Every command received, including the trailing `#`.
    pub commands: Vec<String>,
    /// `(plane, word)` for every FCR write.
    pub fcr_log: Vec<(u32, u32)>,
    /// FSR values returned before falling back to `fsr_idle`.
    pub fsr_script: [VecDeque<u32>; 2],
    pub fsr_idle: [u32; 2],
    /// Number of upcoming word reads that get no reply.
    pub silent_word_reads: usize,
    /// Cut the next reply down to this many bytes.
    pub truncate_next_reply: Option<usize>,
    pub gpnvm: u32,
    pub reset_word: Option<u32>,
    /// Jump word addresses received with `G`.
    pub go_log: Vec<u32>,
    pub fail_writes: bool,
    /// Fail the next read and lose whatever reply was in flight.
    pub fail_next_read: bool,
    /// Cancel the token once this FCR word is written.
    pub cancel_on_fcr: Option<(u32, CancelToken)>,
}

impl SimDevice {
    pub(crate) fn new(chip_id: u32) -> Self {
        let profile = ChipProfile::from_chip_id(chip_id).expect("registered chip id");
        Self::with_profile(chip_id, profile)
    }

    pub(crate) fn with_profile(chip_id: u32, profile: ChipProfile) -> Self {
        Self {
            profile,
            rx: VecDeque::new(),
            line: Vec::new(),
            payload: None,
            memory: BTreeMap::new(),
            latch: BTreeMap::new(),
            chunk: 3,
            timeout: Duration::from_millis(10),
            chip_id,
            version: SIM_VERSION.to_vec(),
            commands: Vec::new(),
            fcr_log: Vec::new(),
            fsr_script: [VecDeque::new(), VecDeque::new()],
            fsr_idle: [FSR_FRDY; 2],
            silent_word_reads: 0,
            truncate_next_reply: None,
            gpnvm: 0,
            reset_word: None,
            go_log: Vec::new(),
            fail_writes: false,
            fail_next_read: false,
            cancel_on_fcr: None,
        }
    }

    /// Deliver replies in reads of at most `chunk` bytes.
    pub(crate) fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub(crate) fn bytes_at(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len as u32).map(|i| self.read_byte_at(addr + i)).collect()
    }

    pub(crate) fn word_at(&self, addr: u32) -> u32 {
        u32::from_le_bytes([
            self.read_byte_at(addr),
            self.read_byte_at(addr + 1),
            self.read_byte_at(addr + 2),
            self.read_byte_at(addr + 3),
        ])
    }

    pub(crate) fn fill_flash(&mut self, addr: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.memory.insert(addr + i as u32, *b);
        }
    }

    fn in_flash(&self, addr: u32) -> bool {
        addr >= self.profile.flash_base && addr < self.profile.flash_base + self.profile.flash_size()
    }

    fn read_byte_at(&self, addr: u32) -> u8 {
        let blank = if self.in_flash(addr) { 0xFF } else { 0x00 };
        self.memory.get(&addr).copied().unwrap_or(blank)
    }

    fn store_byte(&mut self, addr: u32, value: u8) {
        if self.in_flash(addr) {
            self.latch.insert(addr % self.profile.page_size, value);
        } else {
            self.memory.insert(addr, value);
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        let len = self.truncate_next_reply.take().unwrap_or(bytes.len()).min(bytes.len());
        self.rx.extend(&bytes[..len]);
    }

    fn plane_registers(&self) -> Vec<PlaneRegisters> {
        (0..self.profile.planes)
            .map(|plane| PlaneRegisters::new(self.profile.eefc_base, plane))
            .collect()
    }

    fn read_word(&mut self, addr: u32) -> Option<u32> {
        if self.silent_word_reads > 0 {
            self.silent_word_reads -= 1;
            return None;
        }
        let fsr_plane = self
            .plane_registers()
            .iter()
            .position(|regs| regs.fsr == addr);
        if let Some(plane) = fsr_plane {
            return Some(
                self.fsr_script[plane]
                    .pop_front()
                    .unwrap_or(self.fsr_idle[plane]),
            );
        }
        if addr == crate::session::CHIPID_CIDR {
            return Some(self.chip_id);
        }
        Some(self.word_at(addr))
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        let fcr_plane = self
            .plane_registers()
            .iter()
            .position(|regs| regs.fcr == addr);
        if let Some(plane) = fcr_plane {
            self.execute_fcr(plane as u32, value);
            return;
        }
        if addr == self.profile.rstc_base + RSTC_CR_OFFSET {
            self.reset_word = Some(value);
            return;
        }
        for (i, b) in value.to_le_bytes().iter().enumerate() {
            self.store_byte(addr + i as u32, *b);
        }
    }

    fn erase_pages(&mut self, first: u32, count: u32) {
        let start = self.profile.page_address(first);
        let end = self.profile.page_address(first + count);
        self.memory.retain(|addr, _| *addr < start || *addr >= end);
    }

    fn commit_latch(&mut self, plane: u32, index: u32, erase: bool) {
        let page = plane * self.profile.pages_per_plane() + index;
        if erase {
            self.erase_pages(page, 1);
        }
        let base = self.profile.page_address(page);
        for (offset, value) in std::mem::take(&mut self.latch) {
            let addr = base + offset;
            let current = self.read_byte_at(addr);
            self.memory.insert(addr, current & value);
        }
    }

    fn execute_fcr(&mut self, plane: u32, word: u32) {
        self.fcr_log.push((plane, word));
        if let Some((trigger, cancel)) = &self.cancel_on_fcr {
            if *trigger == word {
                cancel.cancel();
            }
        }
        if word >> 24 != 0x5A {
            return;
        }
        let arg = (word >> 8) & 0xFFFF;
        match EefcCommand::from_code(word as u8) {
            Some(EefcCommand::EraseAll) => {
                let per_plane = self.profile.pages_per_plane();
                self.erase_pages(plane * per_plane, per_plane);
            },
            Some(EefcCommand::WritePage) => self.commit_latch(plane, arg, false),
            Some(EefcCommand::EraseWritePage) => self.commit_latch(plane, arg, true),
            Some(EefcCommand::SetGpnvm) => self.gpnvm |= 1 << arg,
            Some(EefcCommand::ClearGpnvm) => self.gpnvm &= !(1 << arg),
            _ => {},
        }
    }

    fn go(&mut self, jump_word: u32) {
        self.go_log.push(jump_word);
        let entry = self.word_at(jump_word);
        if let WriteStrategy::Assisted(layout) = self.profile.strategy {
            if entry == layout.entry {
                let from = self.word_at(layout.copy_from_ptr);
                let to = self.word_at(layout.copy_to_ptr);
                let len = self.word_at(layout.copy_length);
                for i in 0..len {
                    let value = self.read_byte_at(from + i);
                    self.store_byte(to + i, value);
                }
            }
        }
    }

    fn handle_command(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line).into_owned();
        self.commands.push(text.clone());

        let body = text.trim_end_matches('#');
        let Some(kind) = body.chars().next() else {
            return;
        };
        let fields: Vec<u32> = body[1..]
            .split(',')
            .filter(|f| !f.is_empty())
            .map(|f| u32::from_str_radix(f, 16).expect("hex field"))
            .collect();

        match kind {
            'N' => self.reply(b"\n\r"),
            'V' => {
                let version = self.version.clone();
                self.reply(&version);
            },
            'w' => {
                if let Some(value) = self.read_word(fields[0]) {
                    self.reply(&value.to_le_bytes());
                }
            },
            'o' => {
                let value = self.read_byte_at(fields[0]);
                self.reply(&[value]);
            },
            'W' => self.write_word(fields[0], fields[1]),
            'R' => {
                let bytes = self.bytes_at(fields[0], fields[1] as usize);
                self.reply(&bytes);
            },
            'S' => self.payload = Some((fields[0], fields[1] as usize)),
            'G' => self.go(fields[0]),
            _ => {},
        }
    }
}

impl Read for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_next_read {
            self.fail_next_read = false;
            self.rx.clear();
            return Err(io::Error::other("line glitch"));
        }
        if self.rx.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.chunk).min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        for &byte in buf {
            if let Some((addr, remaining)) = self.payload {
                self.store_byte(addr, byte);
                self.payload = (remaining > 1).then_some((addr + 1, remaining - 1));
                continue;
            }
            self.line.push(byte);
            if byte == b'#' {
                let line = std::mem::take(&mut self.line);
                self.handle_command(&line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        Ok(())
    }
}

impl Port for SimDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Route `log` output through the test harness.
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
