// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The 12-byte header at the start of every staged update.
//!
//! ```text
//! 0..4   magic "OSUP"
//! 4..8   payload size, u32 LE
//! 8      marker
//! 9..12  reserved, 0xFF
//! ```
//!
//! The payload follows, then the signature block and the key block, 256
//! bytes each.

use crate::rsa::RSA_BYTES;

pub const MAGIC: [u8; 4] = *b"OSUP";
pub const HEADER_SIZE: usize = 12;
pub const MARKER_OFFSET: u32 = 8;
/// Signature block plus key block.
pub const TRAILER_SIZE: usize = 2 * RSA_BYTES;

/// Trust state of a staged update. Every legal transition only clears bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Marker {
    InProgress = 0xFF,
    Downloaded = 0xFE,
    Verified = 0xF0,
    Invalid = 0x00,
}

impl Marker {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xFF => Some(Self::InProgress),
            0xFE => Some(Self::Downloaded),
            0xF0 => Some(Self::Verified),
            0x00 => Some(Self::Invalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OsUpdateHdr {
    pub magic: [u8; 4],
    pub size: u32,
    pub marker: u8,
    pub reserved: [u8; 3],
}

impl OsUpdateHdr {
    /// Header of a freshly written update.
    pub fn new(size: u32) -> Self {
        Self {
            magic: MAGIC,
            size,
            marker: Marker::InProgress as u8,
            reserved: [0xFF; 3],
        }
    }

    pub fn from_bytes(b: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [b[0], b[1], b[2], b[3]],
            size: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            marker: b[8],
            reserved: [b[9], b[10], b[11]],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..4].copy_from_slice(&self.magic);
        b[4..8].copy_from_slice(&self.size.to_le_bytes());
        b[8] = self.marker;
        b[9..12].copy_from_slice(&self.reserved);
        b
    }

    pub fn has_magic(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn marker(&self) -> Option<Marker> {
        Marker::from_byte(self.marker)
    }

    /// Header, payload and trailer. `None` if that overflows a u32.
    pub fn image_len(&self) -> Option<u32> {
        self.size.checked_add((HEADER_SIZE + TRAILER_SIZE) as u32)
    }

    /// The header bytes as covered by the signature: the marker is hashed as
    /// INPROGRESS whatever it currently holds.
    pub fn signed_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut b = self.to_bytes();
        b[MARKER_OFFSET as usize] = Marker::InProgress as u8;
        b
    }
}
