// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device side of the serial update protocol.
//!
//! The result of each command is not sent when the command ends but as the
//! reply to the host's next SYNC byte.

use host_protocol::{length_check, Checksum, Command, ACK, MASS_ERASE, MAX_TRANSFER, NAK, SHARED_WINDOW_ADDR, SIZES_LEN, SYNC, VERSION};

use crate::flash::{FlashKeys, PlatformFlash, Programmer, RegionType};
use crate::header::{Marker, OsUpdateHdr, HEADER_SIZE};
use crate::rsa::PubKey;
use crate::update::{mark_update, verify};

/// Byte link to the host.
pub trait Transport {
    /// Next byte while waiting between commands. `None` once the host has
    /// been quiet for the idle timeout.
    fn poll(&mut self) -> Option<u8>;

    /// Next byte inside a command. Blocks; `None` only if the link is gone.
    fn read(&mut self) -> Option<u8>;

    fn write(&mut self, byte: u8);
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEnd {
    /// Host went quiet
    Timeout,
    /// Expected SYNC or a command complement and got something else
    Framing,
    /// A field failed its checksum
    Checksum,
    LinkLost,
}

/// One protocol session. The erase gate and the write cursor live only as
/// long as this value.
pub struct Session<'p, 'a, P> {
    prog: &'p mut Programmer<'a, P>,
    pub_keys: &'p [PubKey],
    keys: &'p FlashKeys,
    shared_base: u32,
    shared_len: u32,
    erased: bool,
    next_addr: u32,
    expected_len: u32,
    pending: u8,
}

impl<'p, 'a, P: PlatformFlash> Session<'p, 'a, P> {
    pub fn new(prog: &'p mut Programmer<'a, P>, pub_keys: &'p [PubKey], keys: &'p FlashKeys) -> Self {
        let table = prog.table();
        let (shared_base, shared_len) = match table.first(RegionType::Shared) {
            Some(r) => {
                let end = table.span_end(r.base, RegionType::Shared).unwrap_or(r.end());
                (r.base, end - r.base)
            }
            None => (0, 0),
        };
        Self {
            prog,
            pub_keys,
            keys,
            shared_base,
            shared_len,
            erased: false,
            next_addr: 0,
            expected_len: 0,
            pending: ACK,
        }
    }

    /// Serves commands until the host goes quiet or breaks framing. With
    /// `forced` the first wait for SYNC has no timeout.
    pub fn run<T: Transport>(&mut self, port: &mut T, forced: bool) -> SessionEnd {
        let mut first = true;
        loop {
            let b = if first && forced { port.read() } else { port.poll() };
            first = false;
            let Some(b) = b else {
                return SessionEnd::Timeout;
            };
            if b != SYNC {
                debug!("expected sync, got {:#x}", b);
                return SessionEnd::Framing;
            }
            port.write(self.pending);

            let Some(code) = port.poll() else {
                return SessionEnd::Timeout;
            };
            let Some(complement) = port.read() else {
                return SessionEnd::LinkLost;
            };
            if code ^ complement != 0xFF {
                port.write(NAK);
                return SessionEnd::Framing;
            }

            let cmd = match Command::from_byte(code) {
                Some(Command::ReadMemory | Command::WriteMemory) if !self.erased => None,
                cmd => cmd,
            };
            let Some(cmd) = cmd else {
                debug!("refusing command {:#x}", code);
                port.write(NAK);
                self.pending = NAK;
                continue;
            };
            port.write(ACK);

            let result = match cmd {
                Command::Get => self.get(port),
                Command::GetSizes => self.get_sizes(port),
                Command::ReadMemory => self.read_memory(port),
                Command::WriteMemory => self.write_memory(port),
                Command::Erase => self.erase(port),
                Command::UpdateFinished => Ok(self.update_finished()),
            };
            match result {
                Ok(reply) => self.pending = reply,
                Err(end) => {
                    warn!("session ended in {:?}", cmd);
                    return end;
                }
            }
        }
    }

    fn get<T: Transport>(&mut self, port: &mut T) -> Result<u8, SessionEnd> {
        let mut sum = Checksum::new();
        let mut send = |b: u8| {
            sum.push(b);
            port.write(b);
        };
        send(Command::ALL.len() as u8);
        send(VERSION);
        for cmd in Command::ALL {
            send(cmd as u8);
        }
        port.write(sum.value());
        Ok(ACK)
    }

    fn get_sizes<T: Transport>(&mut self, port: &mut T) -> Result<u8, SessionEnd> {
        let table = self.prog.table();
        let mut sizes = [0u8; SIZES_LEN as usize];
        sizes[0..4].copy_from_slice(&table.size_of(RegionType::Kernel).to_be_bytes());
        sizes[4..8].copy_from_slice(&table.size_of(RegionType::Shared).to_be_bytes());
        sizes[8..12].copy_from_slice(&table.size_of(RegionType::DataStore).to_be_bytes());
        port.write(SIZES_LEN);
        for b in sizes {
            port.write(b);
        }
        port.write(Checksum::of(&sizes));
        Ok(ACK)
    }

    fn read_memory<T: Transport>(&mut self, port: &mut T) -> Result<u8, SessionEnd> {
        let addr = u32::from_be_bytes(read_field(port)?);
        let Some(offset) = self.window_offset(addr) else {
            port.write(NAK);
            return Ok(NAK);
        };
        port.write(ACK);

        let n = read_byte(port)?;
        if read_byte(port)? != length_check(n) {
            port.write(NAK);
            return Err(SessionEnd::Checksum);
        }
        let len = n as u32 + 1;
        let mut buf = [0u8; MAX_TRANSFER];
        let data = &mut buf[..len as usize];
        if offset + len > self.shared_len || self.prog.read(self.shared_base + offset, data).is_err() {
            port.write(NAK);
            return Ok(NAK);
        }
        port.write(ACK);
        for b in data.iter() {
            port.write(*b);
        }
        port.write(Checksum::of(data));
        Ok(ACK)
    }

    fn write_memory<T: Transport>(&mut self, port: &mut T) -> Result<u8, SessionEnd> {
        let addr = u32::from_be_bytes(read_field(port)?);
        if self.window_offset(addr) != Some(self.next_addr) {
            debug!("write at {:#x}, cursor at {:#x}", addr, self.next_addr);
            port.write(NAK);
            return Ok(NAK);
        }
        port.write(ACK);

        let n = read_byte(port)?;
        let mut sum = Checksum::new();
        sum.push(n);
        let mut buf = [0u8; MAX_TRANSFER];
        let data = &mut buf[..n as usize + 1];
        for slot in data.iter_mut() {
            *slot = read_byte(port)?;
            sum.push(*slot);
        }
        if read_byte(port)? != sum.value() {
            port.write(NAK);
            return Err(SessionEnd::Checksum);
        }

        if self.next_addr == 0 {
            match self.accept_header(data) {
                Some(len) => self.expected_len = len,
                None => return Ok(NAK),
            }
        }
        let len = data.len() as u32;
        if self.next_addr + len > self.expected_len {
            return Ok(NAK);
        }
        let dst = self.shared_base + self.next_addr;
        match self.prog.program_typed(dst, data, RegionType::Shared, self.keys) {
            Ok(()) => {
                self.next_addr += len;
                Ok(ACK)
            }
            Err(_) => Ok(NAK),
        }
    }

    /// First write of an update: must carry a fresh header whose image fits
    /// the shared area. Returns the image length.
    fn accept_header(&self, data: &[u8]) -> Option<u32> {
        let raw: &[u8; HEADER_SIZE] = data.get(..HEADER_SIZE)?.try_into().ok()?;
        let hdr = OsUpdateHdr::from_bytes(raw);
        if !hdr.has_magic() || hdr.marker() != Some(Marker::InProgress) {
            warn!("rejecting update header");
            return None;
        }
        let len = hdr.image_len()?;
        if len > self.shared_len {
            warn!("update of {} bytes does not fit", len);
            return None;
        }
        info!("receiving {} byte update", len);
        Some(len)
    }

    fn erase<T: Transport>(&mut self, port: &mut T) -> Result<u8, SessionEnd> {
        let code = u16::from_be_bytes(read_field(port)?);
        if code != MASS_ERASE {
            return Ok(NAK);
        }
        self.next_addr = 0;
        self.expected_len = 0;
        match self.prog.erase_typed(RegionType::Shared, self.keys) {
            Ok(()) => {
                self.erased = true;
                Ok(ACK)
            }
            Err(_) => Ok(NAK),
        }
    }

    /// Only an image completely written in this session can be finished.
    fn update_finished(&mut self) -> u8 {
        if self.expected_len == 0 || self.next_addr != self.expected_len {
            warn!("update finished with {} of {} bytes", self.next_addr, self.expected_len);
            return NAK;
        }
        let hdr = self.shared_base;
        let result = mark_update(self.prog, hdr, Marker::InProgress, Marker::Downloaded, self.keys)
            .and_then(|()| verify(self.prog, self.pub_keys, hdr, self.keys));
        match result {
            Ok(()) => ACK,
            Err(e) => {
                warn!("update finished: {:?}", e);
                NAK
            }
        }
    }

    fn window_offset(&self, addr: u32) -> Option<u32> {
        let offset = addr.checked_sub(SHARED_WINDOW_ADDR)?;
        (offset < self.shared_len).then_some(offset)
    }
}

fn read_byte<T: Transport>(port: &mut T) -> Result<u8, SessionEnd> {
    port.read().ok_or(SessionEnd::LinkLost)
}

/// Reads a fixed-size field and its checksum. On mismatch NAKs and ends the
/// session.
fn read_field<T: Transport, const N: usize>(port: &mut T) -> Result<[u8; N], SessionEnd> {
    let mut field = [0u8; N];
    for b in field.iter_mut() {
        *b = read_byte(port)?;
    }
    if read_byte(port)? != Checksum::of(&field) {
        port.write(NAK);
        return Err(SessionEnd::Checksum);
    }
    Ok(field)
}
