// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host side of the serial update protocol.
//!
//! The bootloader answers each SYNC with the result of the command before
//! it, so commands whose outcome is only known after their data has been
//! consumed (ERASE, WRITE_MEMORY, UPDATE_FINISHED) are followed by a SYNC
//! here to collect it. The device then waits for a command code, which the
//! next call sends without another SYNC.

use {
    host_protocol::{
        length_check, Checksum, Command, ACK, MASS_ERASE, MAX_TRANSFER, NAK, SHARED_WINDOW_ADDR,
        SIZES_LEN, SYNC,
    },
    std::io::{Read, Write},
};

/// Reply to GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: u8,
    pub commands: Vec<u8>,
}

/// Reply to GET_SIZES, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub kernel: u32,
    pub shared: u32,
    pub data_store: u32,
}

pub struct Client<P> {
    port: P,
    /// Device has answered a SYNC and waits for a command code.
    synced: bool,
    last_reply: u8,
}

impl<P: Read + Write> Client<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            synced: false,
            last_reply: ACK,
        }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    /// Result of the previous command as reported by the device, ACK or NAK.
    /// Only sends SYNC if the device is not already waiting for a command.
    pub fn sync(&mut self) -> Result<u8, Error> {
        if !self.synced {
            self.send(&[SYNC])?;
            self.last_reply = match self.recv_byte()? {
                b @ (ACK | NAK) => b,
                b => return Err(Error::Unexpected(b)),
            };
            self.synced = true;
        }
        Ok(self.last_reply)
    }

    pub fn get(&mut self) -> Result<DeviceInfo, Error> {
        self.command(Command::Get)?;
        let count = self.recv_byte()?;
        let mut reply = vec![0u8; count as usize + 1];
        self.port.read_exact(&mut reply)?;
        let mut sum = Checksum::new();
        sum.push(count);
        sum.update(&reply);
        if self.recv_byte()? != sum.value() {
            return Err(Error::Checksum(Command::Get));
        }
        Ok(DeviceInfo {
            version: reply[0],
            commands: reply[1..].to_vec(),
        })
    }

    pub fn get_sizes(&mut self) -> Result<Sizes, Error> {
        self.command(Command::GetSizes)?;
        let len = self.recv_byte()?;
        if len != SIZES_LEN {
            return Err(Error::Unexpected(len));
        }
        let mut sizes = [0u8; SIZES_LEN as usize];
        self.port.read_exact(&mut sizes)?;
        if self.recv_byte()? != Checksum::of(&sizes) {
            return Err(Error::Checksum(Command::GetSizes));
        }
        let word = |i: usize| u32::from_be_bytes([sizes[i], sizes[i + 1], sizes[i + 2], sizes[i + 3]]);
        Ok(Sizes {
            kernel: word(0),
            shared: word(4),
            data_store: word(8),
        })
    }

    /// Mass erase of the staging area. Required before any read or write.
    pub fn erase(&mut self) -> Result<(), Error> {
        self.command(Command::Erase)?;
        let code = MASS_ERASE.to_be_bytes();
        self.send_field(&code)?;
        self.outcome(Command::Erase)
    }

    /// Reads `buf.len()` bytes (at most [`MAX_TRANSFER`]) at `offset` in the
    /// staging area.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        let n = transfer_len(buf.len())?;
        self.command(Command::ReadMemory)?;
        self.send_field(&window_addr(offset)?.to_be_bytes())?;
        self.expect_ack(Command::ReadMemory)?;
        self.send(&[n, length_check(n)])?;
        self.expect_ack(Command::ReadMemory)?;
        self.port.read_exact(buf)?;
        if self.recv_byte()? != Checksum::of(buf) {
            return Err(Error::Checksum(Command::ReadMemory));
        }
        Ok(())
    }

    /// Writes `data` (at most [`MAX_TRANSFER`] bytes) at `offset`. Offsets
    /// must start at 0 after an erase and continue where the last write
    /// ended.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        let n = transfer_len(data.len())?;
        self.command(Command::WriteMemory)?;
        self.send_field(&window_addr(offset)?.to_be_bytes())?;
        self.expect_ack(Command::WriteMemory)?;
        let mut sum = Checksum::new();
        sum.push(n);
        sum.update(data);
        self.send(&[n])?;
        self.send(data)?;
        self.send(&[sum.value()])?;
        self.outcome(Command::WriteMemory)
    }

    /// Marks the uploaded image as downloaded and has the device verify it.
    pub fn update_finished(&mut self) -> Result<(), Error> {
        self.command(Command::UpdateFinished)?;
        self.outcome(Command::UpdateFinished)
    }

    /// Erase, write `image` in [`MAX_TRANSFER`] chunks, then finish.
    /// `progress` gets the number of bytes written so far.
    pub fn upload(&mut self, image: &[u8], mut progress: impl FnMut(usize)) -> Result<(), Error> {
        self.erase()?;
        let mut offset = 0;
        for chunk in image.chunks(MAX_TRANSFER) {
            self.write(offset as u32, chunk)?;
            offset += chunk.len();
            progress(offset);
        }
        log::debug!("wrote {offset} bytes");
        self.update_finished()
    }

    fn command(&mut self, cmd: Command) -> Result<(), Error> {
        self.sync()?;
        self.synced = false;
        self.send(&cmd.frame())?;
        self.expect_ack(cmd)
    }

    /// Collects the deferred result of `cmd`.
    fn outcome(&mut self, cmd: Command) -> Result<(), Error> {
        match self.sync()? {
            ACK => Ok(()),
            _ => Err(Error::Rejected(cmd)),
        }
    }

    fn expect_ack(&mut self, cmd: Command) -> Result<(), Error> {
        match self.recv_byte()? {
            ACK => Ok(()),
            NAK => Err(Error::Rejected(cmd)),
            b => Err(Error::Unexpected(b)),
        }
    }

    fn send_field(&mut self, field: &[u8]) -> Result<(), Error> {
        self.send(field)?;
        self.send(&[Checksum::of(field)])
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn recv_byte(&mut self) -> Result<u8, Error> {
        let mut b = [0u8; 1];
        self.port.read_exact(&mut b)?;
        Ok(b[0])
    }
}

fn transfer_len(len: usize) -> Result<u8, Error> {
    if len == 0 || len > MAX_TRANSFER {
        return Err(Error::TransferLength(len));
    }
    Ok((len - 1) as u8)
}

fn window_addr(offset: u32) -> Result<u32, Error> {
    SHARED_WINDOW_ADDR
        .checked_add(offset)
        .ok_or(Error::Offset(offset))
}

#[derive(Debug)]
pub enum Error {
    Checksum(Command),
    Io(std::io::Error),
    Offset(u32),
    Rejected(Command),
    TransferLength(usize),
    Unexpected(u8),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Checksum(cmd) => write!(f, "bad checksum in {cmd:?} reply"),
            Error::Io(e) => write!(f, "serial port: {e}"),
            Error::Offset(offset) => write!(f, "offset {offset:#x} outside the staging window"),
            Error::Rejected(cmd) => write!(f, "device rejected {cmd:?}"),
            Error::TransferLength(len) => {
                write!(f, "transfer of {len} bytes, must be 1 to {MAX_TRANSFER}")
            }
            Error::Unexpected(b) => write!(f, "unexpected byte {b:#04x} from device"),
        }
    }
}

impl std::error::Error for Error {}
