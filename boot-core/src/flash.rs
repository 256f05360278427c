// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Flash region table and the typed programmer.
//!
//! Every erase or program goes through [`Programmer`], which refuses to touch
//! bytes outside regions of the requested [`RegionType`] and refuses any
//! write that would have to set a bit back to 1.

use core::fmt;

use consts::{FLASH_KEY1, FLASH_KEY2};
use embedded_storage::nor_flash::{MultiwriteNorFlash, NorFlash, ReadNorFlash};

/// Bytes compared or copied per step. Also the merge buffer size used to
/// widen unaligned programs, so NOR write sizes up to this are supported.
const CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionType {
    Bootloader,
    DataStore,
    Kernel,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashRegion {
    pub base: u32,
    pub len: u32,
    pub kind: RegionType,
}

impl FlashRegion {
    pub const fn new(base: u32, len: u32, kind: RegionType) -> Self {
        Self { base, len, kind }
    }

    /// One past the last byte. Only valid for regions accepted by
    /// [`RegionTable::new`].
    pub const fn end(&self) -> u32 {
        self.base + self.len
    }

    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end()
    }

    fn overlaps(&self, other: &FlashRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Immutable description of the flash, injected at startup.
#[derive(Debug, Clone, Copy)]
pub struct RegionTable<'a> {
    regions: &'a [FlashRegion],
}

impl<'a> RegionTable<'a> {
    /// Rejects empty regions, regions running past the end of the address
    /// space and overlapping regions of different types.
    pub fn new(regions: &'a [FlashRegion]) -> Result<Self, FlashError> {
        for (i, r) in regions.iter().enumerate() {
            if r.len == 0 || r.base.checked_add(r.len).is_none() {
                return Err(FlashError::BadRegionTable);
            }
            if regions[..i]
                .iter()
                .any(|other| other.kind != r.kind && other.overlaps(r))
            {
                return Err(FlashError::BadRegionTable);
            }
        }
        Ok(Self { regions })
    }

    pub fn regions(&self) -> &'a [FlashRegion] {
        self.regions
    }

    /// Lowest-addressed region of the given type.
    pub fn first(&self, kind: RegionType) -> Option<FlashRegion> {
        self.regions
            .iter()
            .filter(|r| r.kind == kind)
            .min_by_key(|r| r.base)
            .copied()
    }

    /// Total number of bytes tagged with `kind`.
    pub fn size_of(&self, kind: RegionType) -> u32 {
        self.regions
            .iter()
            .filter(|r| r.kind == kind)
            .fold(0u32, |acc, r| acc.saturating_add(r.len))
    }

    /// End of the contiguous run of `kind` regions starting at the one that
    /// contains `addr`.
    pub fn span_end(&self, addr: u32, kind: RegionType) -> Option<u32> {
        let mut end = self.find(addr, kind)?.end();
        while let Some(next) = self.find(end, kind) {
            end = next.end();
        }
        Some(end)
    }

    /// Whether `[addr, addr + len)` lies entirely inside regions of `kind`.
    /// Adjacent regions of the same type may be spanned.
    pub fn covers(&self, addr: u32, len: u32, kind: RegionType) -> bool {
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        let mut cursor = addr;
        while cursor < end {
            match self.find(cursor, kind) {
                Some(r) => cursor = r.end(),
                None => return false,
            }
        }
        true
    }

    fn find(&self, addr: u32, kind: RegionType) -> Option<&'a FlashRegion> {
        self.regions
            .iter()
            .find(|r| r.kind == kind && r.contains(addr))
    }
}

/// Two-word unlock token. Handed by reference to every destructive flash
/// operation; the bootloader builds it on the stack right before it needs it.
pub struct FlashKeys {
    key1: u32,
    key2: u32,
}

impl FlashKeys {
    pub const fn new(key1: u32, key2: u32) -> Self {
        Self { key1, key2 }
    }

    fn unlocks(&self) -> bool {
        self.key1 == FLASH_KEY1 && self.key2 == FLASH_KEY2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Target range is not entirely inside regions of the requested type
    TypeMismatch,
    /// The write would need to turn a 0 bit back into a 1
    IllegalBits,
    /// Flash content differs from the source after programming
    Readback,
    /// Wrong unlock keys
    Locked,
    /// Overlapping or malformed region table
    BadRegionTable,
    /// The underlying flash driver reported an error
    Platform,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch => write!(f, "range is outside regions of the requested type"),
            Self::IllegalBits => write!(f, "write would set programmed bits back to 1"),
            Self::Readback => write!(f, "flash content differs after programming"),
            Self::Locked => write!(f, "flash keys rejected"),
            Self::BadRegionTable => write!(f, "invalid flash region table"),
            Self::Platform => write!(f, "flash driver error"),
        }
    }
}

/// Raw flash primitive the programmer sits on. Addresses are absolute flash
/// offsets; no region checks happen at this level.
pub trait PlatformFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    fn program(&mut self, addr: u32, data: &[u8], keys: &FlashKeys) -> Result<(), FlashError>;
    fn erase(&mut self, from: u32, to: u32, keys: &FlashKeys) -> Result<(), FlashError>;
}

/// [`PlatformFlash`] over any `embedded-storage` NOR flash with a byte
/// granular read. Markers are cleared in place and unaligned programs rewrite
/// their neighbours, so the flash must accept writes to programmed words.
pub struct KeyedFlash<F> {
    flash: F,
}

impl<F> KeyedFlash<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn inner(&self) -> &F {
        &self.flash
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

impl<F: MultiwriteNorFlash> PlatformFlash for KeyedFlash<F> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.flash
            .read(addr, buf)
            .map_err(|_| FlashError::Platform)
    }

    fn program(&mut self, addr: u32, data: &[u8], keys: &FlashKeys) -> Result<(), FlashError> {
        if !keys.unlocks() {
            return Err(FlashError::Locked);
        }
        let ws = F::WRITE_SIZE;
        if ws == 0 || ws > CHUNK || CHUNK % ws != 0 {
            return Err(FlashError::Platform);
        }

        // Widen to whole write units, filling the extra bytes with what is
        // already there.
        let start = addr as usize;
        let end = start + data.len();
        let mut pos = start - start % ws;
        let aligned_end = end.div_ceil(ws) * ws;
        let mut buf = [0xFFu8; CHUNK];
        while pos < aligned_end {
            let len = (aligned_end - pos).min(CHUNK);
            let chunk = &mut buf[..len];
            self.flash
                .read(pos as u32, chunk)
                .map_err(|_| FlashError::Platform)?;
            for (i, b) in chunk.iter_mut().enumerate() {
                let a = pos + i;
                if (start..end).contains(&a) {
                    *b = data[a - start];
                }
            }
            self.flash
                .write(pos as u32, chunk)
                .map_err(|_| FlashError::Platform)?;
            pos += len;
        }
        Ok(())
    }

    fn erase(&mut self, from: u32, to: u32, keys: &FlashKeys) -> Result<(), FlashError> {
        if !keys.unlocks() {
            return Err(FlashError::Locked);
        }
        self.flash
            .erase(from, to)
            .map_err(|_| FlashError::Platform)
    }
}

/// Region-checked access to flash.
pub struct Programmer<'a, P> {
    flash: P,
    table: RegionTable<'a>,
}

impl<'a, P: PlatformFlash> Programmer<'a, P> {
    pub fn new(flash: P, table: RegionTable<'a>) -> Self {
        Self { flash, table }
    }

    pub fn table(&self) -> RegionTable<'a> {
        self.table
    }

    pub fn flash(&self) -> &P {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut P {
        &mut self.flash
    }

    pub fn into_inner(self) -> P {
        self.flash
    }

    /// Reads are not region checked.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.flash.read(addr, buf)
    }

    pub fn read_word(&mut self, addr: u32) -> Result<u32, FlashError> {
        let mut word = [0u8; 4];
        self.flash.read(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Programs `src` at `dst`. The whole range must be inside regions of
    /// `kind` and the write may only clear bits. Nothing is written if either
    /// check fails. The result is read back and compared.
    pub fn program_typed(
        &mut self,
        dst: u32,
        src: &[u8],
        kind: RegionType,
        keys: &FlashKeys,
    ) -> Result<(), FlashError> {
        if src.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(src.len()).map_err(|_| FlashError::TypeMismatch)?;
        if !self.table.covers(dst, len, kind) {
            warn!("program {:#x}+{} outside {:?}", dst, len, kind);
            return Err(FlashError::TypeMismatch);
        }

        let mut buf = [0u8; CHUNK];
        let mut addr = dst;
        for chunk in src.chunks(CHUNK) {
            let current = &mut buf[..chunk.len()];
            self.flash.read(addr, current)?;
            if current.iter().zip(chunk).any(|(old, new)| old & new != *new) {
                warn!("program {:#x} would set bits", addr);
                return Err(FlashError::IllegalBits);
            }
            addr += chunk.len() as u32;
        }

        self.flash.program(dst, src, keys)?;

        let mut addr = dst;
        for chunk in src.chunks(CHUNK) {
            let written = &mut buf[..chunk.len()];
            self.flash.read(addr, written)?;
            if written != chunk {
                warn!("readback mismatch at {:#x}", addr);
                return Err(FlashError::Readback);
            }
            addr += chunk.len() as u32;
        }
        Ok(())
    }

    /// Erases every region of `kind`. Succeeds without doing anything when
    /// no region has that type.
    pub fn erase_typed(&mut self, kind: RegionType, keys: &FlashKeys) -> Result<(), FlashError> {
        for r in self.table.regions().iter().filter(|r| r.kind == kind) {
            debug!("erase {:#x}..{:#x}", r.base, r.end());
            self.flash.erase(r.base, r.end(), keys)?;
        }
        Ok(())
    }
}
