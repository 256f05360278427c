// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Verification and application of a staged update.

use core::fmt;

use sha2::{Digest, Sha256};

use crate::flash::{FlashError, FlashKeys, PlatformFlash, Programmer, RegionType};
use crate::hash::{ct_eq, SHA256_SIZE};
use crate::header::{Marker, OsUpdateHdr, HEADER_SIZE, MARKER_OFFSET, TRAILER_SIZE};
use crate::rsa::{limbs_from_le, Limbs, PubKey, RsaState, RSA_BYTES, RSA_LIMBS};

/// Payload bytes moved per step when hashing or copying.
const COPY_CHUNK: usize = 256;

const DIGEST_WORDS: usize = SHA256_SIZE / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError {
    /// Header misplaced, truncated, oversized or without magic
    HdrCheckFailed,
    /// Marker says the update must not be trusted
    HdrMarkerInvalid,
    /// Key block matches no key in the table
    UnknownPubkey,
    /// Signature could not be decoded with the key
    InvalidSignature,
    /// Bad padding or digest mismatch
    InvalidSignatureHash,
    /// Guarded marker update found a different marker on flash
    MarkerMismatch,
    /// Apply was asked for an update that is not VERIFIED
    NotVerified,
    /// Payload does not fit the kernel region
    TooLarge,
    Flash(FlashError),
}

pub const SUCCESS: u8 = 0;

impl UpdateError {
    /// Status code reported to callers outside this crate.
    pub fn code(&self) -> u8 {
        match self {
            Self::HdrCheckFailed | Self::TooLarge => 1,
            Self::HdrMarkerInvalid | Self::MarkerMismatch | Self::NotVerified => 2,
            Self::UnknownPubkey => 3,
            Self::InvalidSignature => 4,
            Self::InvalidSignatureHash => 5,
            Self::Flash(_) => 6,
        }
    }
}

impl From<FlashError> for UpdateError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HdrCheckFailed => write!(f, "update header check failed"),
            Self::HdrMarkerInvalid => write!(f, "update marker does not allow verification"),
            Self::UnknownPubkey => write!(f, "unknown public key"),
            Self::InvalidSignature => write!(f, "invalid signature"),
            Self::InvalidSignatureHash => write!(f, "invalid signature hash"),
            Self::MarkerMismatch => write!(f, "update marker changed unexpectedly"),
            Self::NotVerified => write!(f, "update is not verified"),
            Self::TooLarge => write!(f, "update does not fit the kernel region"),
            Self::Flash(e) => write!(f, "flash: {e}"),
        }
    }
}

/// Something a staged image can be read from: the flash programmer on the
/// device, a byte slice on a host.
pub trait ImageSource {
    fn read_at(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;
}

impl<P: PlatformFlash> ImageSource for Programmer<'_, P> {
    fn read_at(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.read(addr, buf)
    }
}

impl ImageSource for &[u8] {
    fn read_at(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = addr as usize;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or(FlashError::Platform)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Reads the header and checks that it and everything it declares fit
/// before `limit`.
pub fn check_header<S: ImageSource>(
    src: &mut S,
    hdr_addr: u32,
    limit: u32,
) -> Result<OsUpdateHdr, UpdateError> {
    if hdr_addr % 4 != 0 {
        return Err(UpdateError::HdrCheckFailed);
    }
    let fixed = (HEADER_SIZE + TRAILER_SIZE) as u64;
    if hdr_addr as u64 + fixed > limit as u64 {
        return Err(UpdateError::HdrCheckFailed);
    }

    let mut raw = [0u8; HEADER_SIZE];
    src.read_at(hdr_addr, &mut raw)?;
    let hdr = OsUpdateHdr::from_bytes(&raw);

    if hdr_addr as u64 + fixed + hdr.size as u64 > limit as u64 {
        return Err(UpdateError::HdrCheckFailed);
    }
    if !hdr.has_magic() {
        return Err(UpdateError::HdrCheckFailed);
    }
    // VERIFIED can only be written over DOWNLOADED or itself.
    match hdr.marker() {
        Some(Marker::Downloaded | Marker::Verified) => Ok(hdr),
        _ => Err(UpdateError::HdrMarkerInvalid),
    }
}

/// Key lookup, RSA, padding and digest. Does not touch the marker. `hdr`
/// must have passed [`check_header`].
pub fn authenticate<S: ImageSource>(
    src: &mut S,
    pub_keys: &[PubKey],
    hdr_addr: u32,
    hdr: &OsUpdateHdr,
) -> Result<(), UpdateError> {
    let sig_addr = hdr_addr + HEADER_SIZE as u32 + hdr.size;
    let key_addr = sig_addr + RSA_BYTES as u32;

    let mut key = [0u8; RSA_BYTES];
    src.read_at(key_addr, &mut key)?;
    let Some(modulus) = pub_keys.iter().find(|k| **k == key) else {
        return Err(UpdateError::UnknownPubkey);
    };

    let mut sig = [0u8; RSA_BYTES];
    src.read_at(sig_addr, &mut sig)?;
    let sig = limbs_from_le(&sig);
    let modulus = limbs_from_le(modulus);
    let mut rsa = RsaState::new(&sig, &modulus);
    let block = rsa.run().map_err(|_| UpdateError::InvalidSignature)?;
    let expected = check_padding(block)?;

    let mut hasher = Sha256::new();
    hasher.update(hdr.signed_bytes());
    let mut buf = [0u8; COPY_CHUNK];
    let payload = hdr_addr + HEADER_SIZE as u32;
    let mut done = 0u32;
    while done < hdr.size {
        let n = (hdr.size - done).min(COPY_CHUNK as u32) as usize;
        src.read_at(payload + done, &mut buf[..n])?;
        hasher.update(&buf[..n]);
        done += n as u32;
    }
    let actual: [u8; SHA256_SIZE] = hasher.finalize().into();

    if ct_eq(&actual, &expected) {
        Ok(())
    } else {
        Err(UpdateError::InvalidSignatureHash)
    }
}

/// Checks the decoded block layout and returns the digest it carries.
fn check_padding(block: &Limbs) -> Result<[u8; SHA256_SIZE], UpdateError> {
    let nonzero = |w: u32| w.to_le_bytes().iter().all(|b| *b != 0);

    let first = block[DIGEST_WORDS];
    if first & 0xFF != 0 || !nonzero(first | 0xFF) {
        return Err(UpdateError::InvalidSignatureHash);
    }
    if !block[DIGEST_WORDS + 1..RSA_LIMBS - 1].iter().all(|w| nonzero(*w)) {
        return Err(UpdateError::InvalidSignatureHash);
    }
    let last = block[RSA_LIMBS - 1];
    if last >> 16 != 2 || !nonzero(last | 0xFFFF_0000) {
        return Err(UpdateError::InvalidSignatureHash);
    }

    let mut digest = [0u8; SHA256_SIZE];
    for (chunk, w) in digest.chunks_exact_mut(4).zip(&block[..DIGEST_WORDS]) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    Ok(digest)
}

/// Authenticates the update whose header is at `hdr_addr` in the shared area
/// and records the outcome in its marker: VERIFIED on success, INVALID when
/// the key, signature, padding or digest check fails.
pub fn verify<P: PlatformFlash>(
    prog: &mut Programmer<'_, P>,
    pub_keys: &[PubKey],
    hdr_addr: u32,
    keys: &FlashKeys,
) -> Result<(), UpdateError> {
    let limit = prog
        .table()
        .span_end(hdr_addr, RegionType::Shared)
        .ok_or(UpdateError::HdrCheckFailed)?;
    let hdr = check_header(prog, hdr_addr, limit)?;

    let result = authenticate(prog, pub_keys, hdr_addr, &hdr);
    let marker = match result {
        Ok(()) => Marker::Verified,
        Err(UpdateError::Flash(_)) => return result,
        Err(_) => Marker::Invalid,
    };
    let written = prog.program_typed(
        hdr_addr + MARKER_OFFSET,
        &[marker as u8],
        RegionType::Shared,
        keys,
    );

    match (result, written) {
        (Ok(()), Ok(())) => {
            info!("update at {:#x} verified", hdr_addr);
            Ok(())
        }
        (Ok(()), Err(e)) => Err(e.into()),
        (Err(e), w) => {
            warn!("update at {:#x} rejected: {:?}", hdr_addr, e);
            if let Err(w) = w {
                warn!("marking invalid failed: {:?}", w);
            }
            Err(e)
        }
    }
}

/// Rewrites the marker to `new` only if it currently reads `old`.
pub fn mark_update<P: PlatformFlash>(
    prog: &mut Programmer<'_, P>,
    hdr_addr: u32,
    old: Marker,
    new: Marker,
    keys: &FlashKeys,
) -> Result<(), UpdateError> {
    let mut current = [0u8; 1];
    prog.read(hdr_addr + MARKER_OFFSET, &mut current)?;
    if current[0] != old as u8 {
        return Err(UpdateError::MarkerMismatch);
    }
    prog.program_typed(hdr_addr + MARKER_OFFSET, &[new as u8], RegionType::Shared, keys)?;
    Ok(())
}

/// Copies a VERIFIED update over the kernel, then erases the shared area so
/// it cannot be applied twice.
pub fn apply<P: PlatformFlash>(
    prog: &mut Programmer<'_, P>,
    hdr_addr: u32,
    keys: &FlashKeys,
) -> Result<(), UpdateError> {
    let mut raw = [0u8; HEADER_SIZE];
    prog.read(hdr_addr, &mut raw)?;
    let hdr = OsUpdateHdr::from_bytes(&raw);
    if !hdr.has_magic() || hdr.marker() != Some(Marker::Verified) {
        return Err(UpdateError::NotVerified);
    }

    let table = prog.table();
    let kernel = table.first(RegionType::Kernel).ok_or(UpdateError::TooLarge)?;
    let kernel_end = table
        .span_end(kernel.base, RegionType::Kernel)
        .ok_or(UpdateError::TooLarge)?;
    if hdr.size > kernel_end - kernel.base {
        return Err(UpdateError::TooLarge);
    }

    info!("applying {} byte update", hdr.size);
    prog.erase_typed(RegionType::Kernel, keys)?;
    let mut buf = [0u8; COPY_CHUNK];
    let payload = hdr_addr + HEADER_SIZE as u32;
    let mut done = 0u32;
    while done < hdr.size {
        let n = (hdr.size - done).min(COPY_CHUNK as u32) as usize;
        prog.read(payload + done, &mut buf[..n])?;
        prog.program_typed(kernel.base + done, &buf[..n], RegionType::Kernel, keys)?;
        done += n as u32;
    }
    prog.erase_typed(RegionType::Shared, keys)?;
    Ok(())
}
