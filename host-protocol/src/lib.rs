// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to bootloader serial protocol.
//! The host (a PC or the main MPU) pushes an OS update into the shared staging
//! area of the target MCU, one byte exchange at a time.
//! Defines the framing bytes, command codes and the XOR checksum shared by
//! both ends.

#![no_std]

/// Sent by the host to start every exchange.
pub const SYNC: u8 = 0x5A;

/// Positive acknowledgment.
pub const ACK: u8 = 0x79;

/// Negative acknowledgment.
pub const NAK: u8 = 0x1F;

/// Protocol version reported by [`Command::Get`].
pub const VERSION: u8 = 0x11;

/// Virtual address at which the shared staging area is visible to
/// READ_MEMORY and WRITE_MEMORY.
pub const SHARED_WINDOW_ADDR: u32 = 0x5000_0000;

/// The only erase code accepted by [`Command::Erase`]: erase the whole
/// staging area.
pub const MASS_ERASE: u16 = 0xFFFF;

/// Largest payload of a single READ_MEMORY or WRITE_MEMORY. The length goes
/// over the wire as `len - 1` in one byte.
pub const MAX_TRANSFER: usize = 256;

/// Number of bytes in the GET_SIZES reply (three big-endian u32).
pub const SIZES_LEN: u8 = 12;

/// Bootloader commands. Each goes over the wire as the code followed by its
/// bitwise complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Report the protocol version and supported commands
    Get = 0x00,
    /// Read back part of the staging area
    ReadMemory = 0x11,
    /// Append data to the staging area
    WriteMemory = 0x31,
    /// Erase the staging area and open the read/write gate
    Erase = 0x44,
    /// Report kernel, shared and data-store sizes
    GetSizes = 0xEE,
    /// Mark the staged update as downloaded and verify it
    UpdateFinished = 0xEF,
}

impl Command {
    /// Every supported command, in the order GET reports them.
    pub const ALL: [Command; 6] = [
        Command::Get,
        Command::ReadMemory,
        Command::WriteMemory,
        Command::Erase,
        Command::GetSizes,
        Command::UpdateFinished,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == b)
    }

    /// The two bytes that introduce this command on the wire.
    pub fn frame(self) -> [u8; 2] {
        [self as u8, !(self as u8)]
    }
}

/// Running XOR checksum. Every multi-byte field is followed by one of these.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Checksum(u8);

impl Checksum {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, data: &[u8]) {
        for b in data {
            self.0 ^= b;
        }
    }

    pub fn push(&mut self, b: u8) {
        self.0 ^= b;
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Checksum of a whole field in one go.
    pub fn of(data: &[u8]) -> u8 {
        let mut c = Self::new();
        c.update(data);
        c.value()
    }
}

/// Check byte sent after a single length byte.
pub fn length_check(n: u8) -> u8 {
    n ^ 0xFF
}
