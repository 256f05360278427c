// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory NOR flash for tests and host tools.
//!
//! Programming ANDs the new bytes into the array, erasing sets whole pages
//! back to `0xFF`, exactly like the real part.

use embedded_storage::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

/// Erase granularity of [`RamFlash`].
pub const RAM_FLASH_PAGE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFlashError {
    OutOfBounds,
    NotAligned,
}

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::NotAligned => NorFlashErrorKind::NotAligned,
        }
    }
}

pub struct RamFlash<const N: usize> {
    mem: [u8; N],
    /// Number of `write` calls, for tests asserting that nothing was written
    pub writes: usize,
    pub erases: usize,
}

impl<const N: usize> RamFlash<N> {
    pub fn new() -> Self {
        Self {
            mem: [0xFF; N],
            writes: 0,
            erases: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// Direct access that bypasses flash semantics, used to simulate
    /// corruption.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, RamFlashError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(RamFlashError::OutOfBounds)?;
        if end > N {
            return Err(RamFlashError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ErrorType for RamFlash<N> {
    type Error = RamFlashError;
}

impl<const N: usize> ReadNorFlash for RamFlash<N> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> NorFlash for RamFlash<N> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = RAM_FLASH_PAGE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(RamFlashError::OutOfBounds);
        }
        let range = self.range(from, (to - from) as usize)?;
        if range.start % Self::ERASE_SIZE != 0 || range.end % Self::ERASE_SIZE != 0 {
            return Err(RamFlashError::NotAligned);
        }
        self.mem[range].fill(0xFF);
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        if range.start % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(RamFlashError::NotAligned);
        }
        for (cell, b) in self.mem[range].iter_mut().zip(bytes) {
            *cell &= b;
        }
        self.writes += 1;
        Ok(())
    }
}

/// Writes AND into the array, so programmed words can be written again.
impl<const N: usize> MultiwriteNorFlash for RamFlash<N> {}
