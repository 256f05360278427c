// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Building and inspecting update images off-device.
//!
//! Signing needs the private key, so this side is only used by host tools
//! and tests. The private operation is behind [`RsaSign`]; this crate never
//! holds a private key.

use core::fmt;

use sha2::{Digest, Sha256};

use crate::hash::SHA256_SIZE;
use crate::header::{OsUpdateHdr, HEADER_SIZE, TRAILER_SIZE};
use crate::rsa::{PubKey, RSA_BYTES};
use crate::update::{authenticate, UpdateError};

pub trait RsaSign {
    /// Public modulus, little-endian. Goes into the key block.
    fn modulus(&self) -> PubKey;

    /// `block^d mod n` on little-endian integers.
    fn sign_block(&self, block: &[u8; RSA_BYTES]) -> [u8; RSA_BYTES];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    BufferTooSmall,
    PayloadTooLarge,
    Truncated,
    BadMagic,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "output buffer too small"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::Truncated => write!(f, "image truncated"),
            Self::BadMagic => write!(f, "not an update image"),
        }
    }
}

pub const fn image_len(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + TRAILER_SIZE
}

/// Digest the signature covers.
pub fn digest(hdr: &OsUpdateHdr, payload: &[u8]) -> [u8; SHA256_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(hdr.signed_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

/// Lays out the block that gets signed: the digest in the low bytes, a zero
/// byte, random non-zero filler, then `0x02 0x00` at the top.
///
/// `nonzero` supplies filler bytes; zeros it returns are skipped.
pub fn encode_digest(digest: &[u8; SHA256_SIZE], mut nonzero: impl FnMut() -> u8) -> [u8; RSA_BYTES] {
    let mut block = [0u8; RSA_BYTES];
    block[..SHA256_SIZE].copy_from_slice(digest);
    block[SHA256_SIZE] = 0;
    for b in &mut block[SHA256_SIZE + 1..RSA_BYTES - 2] {
        *b = loop {
            let r = nonzero();
            if r != 0 {
                break r;
            }
        };
    }
    block[RSA_BYTES - 2] = 0x02;
    block[RSA_BYTES - 1] = 0x00;
    block
}

/// Writes the header (marker INPROGRESS) and the payload. Returns the number
/// of bytes written.
pub fn pack(payload: &[u8], out: &mut [u8]) -> Result<usize, ImageError> {
    let size = u32::try_from(payload.len()).map_err(|_| ImageError::PayloadTooLarge)?;
    let len = HEADER_SIZE + payload.len();
    if out.len() < len {
        return Err(ImageError::BufferTooSmall);
    }
    out[..HEADER_SIZE].copy_from_slice(&OsUpdateHdr::new(size).to_bytes());
    out[HEADER_SIZE..len].copy_from_slice(payload);
    Ok(len)
}

/// Writes a complete signed image. Returns its length.
pub fn seal<S: RsaSign>(
    payload: &[u8],
    out: &mut [u8],
    signer: &S,
    nonzero: impl FnMut() -> u8,
) -> Result<usize, ImageError> {
    let total = image_len(payload.len());
    if out.len() < total {
        return Err(ImageError::BufferTooSmall);
    }
    let len = pack(payload, out)?;
    let hdr = OsUpdateHdr::new(payload.len() as u32);
    let block = encode_digest(&digest(&hdr, payload), nonzero);
    out[len..len + RSA_BYTES].copy_from_slice(&signer.sign_block(&block));
    out[len + RSA_BYTES..total].copy_from_slice(&signer.modulus());
    Ok(total)
}

/// The parts of an image, split but not authenticated.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub header: OsUpdateHdr,
    pub payload: &'a [u8],
    pub signature: &'a [u8; RSA_BYTES],
    pub key: &'a PubKey,
}

pub fn parse_unverified(data: &[u8]) -> Result<ImageView<'_>, ImageError> {
    let raw: &[u8; HEADER_SIZE] = data
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(ImageError::Truncated)?;
    let header = OsUpdateHdr::from_bytes(raw);
    if !header.has_magic() {
        return Err(ImageError::BadMagic);
    }
    let total = header.image_len().ok_or(ImageError::Truncated)? as usize;
    if data.len() < total {
        return Err(ImageError::Truncated);
    }

    let sig_at = HEADER_SIZE + header.size as usize;
    let key_at = sig_at + RSA_BYTES;
    let signature = data[sig_at..key_at]
        .try_into()
        .map_err(|_| ImageError::Truncated)?;
    let key = data[key_at..total]
        .try_into()
        .map_err(|_| ImageError::Truncated)?;
    Ok(ImageView {
        header,
        payload: &data[HEADER_SIZE..sig_at],
        signature,
        key,
    })
}

/// Runs the same key, signature and digest checks as the device, ignoring
/// the marker.
pub fn check_signature(data: &[u8], pub_keys: &[PubKey]) -> Result<(), UpdateError> {
    let view = parse_unverified(data).map_err(|_| UpdateError::HdrCheckFailed)?;
    let mut src = data;
    authenticate(&mut src, pub_keys, 0, &view.header)
}
