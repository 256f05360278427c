// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RSA-2048 key files.
//!
//! Secret keys are PEM, either PKCS#8 (`PRIVATE KEY`) or PKCS#1
//! (`RSA PRIVATE KEY`). Known keys are PEM public keys or the raw 256-byte
//! little-endian modulus, which is exactly what ends up in the key block of
//! a signed image and in the bootloader's key table.

use {
    boot_core::{
        image::RsaSign,
        rsa::{PubKey, RSA_BYTES},
    },
    rsa::{
        pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
        pkcs8::{DecodePrivateKey, DecodePublicKey},
        traits::{PrivateKeyParts, PublicKeyParts},
        BigUint, RsaPrivateKey, RsaPublicKey,
    },
};

/// The only exponent the bootloader verifies with.
const PUBLIC_EXPONENT: u32 = 65537;

#[derive(Debug, Clone)]
pub struct SecretKey {
    key: RsaPrivateKey,
}

impl SecretKey {
    pub fn from_pem(bytes: &[u8]) -> Result<Self, Error> {
        let pem = pem::parse(bytes)?;
        let key = match pem.tag() {
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(pem.contents()).map_err(Error::Pkcs8)?,
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(pem.contents()).map_err(Error::Pkcs1)?,
            tag => return Err(Error::UnsupportedTag(tag.to_owned())),
        };
        key.validate().map_err(Error::InvalidKey)?;
        check_public_parts(key.n(), key.e())?;
        Ok(Self { key })
    }
}

impl RsaSign for SecretKey {
    fn modulus(&self) -> PubKey {
        to_le(self.key.n())
    }

    /// Raw private operation. The block already carries its padding.
    fn sign_block(&self, block: &[u8; RSA_BYTES]) -> [u8; RSA_BYTES] {
        let m = BigUint::from_bytes_le(block);
        to_le(&m.modpow(self.key.d(), self.key.n()))
    }
}

pub fn parse_pubkey(bytes: &[u8]) -> Result<PubKey, Error> {
    if !bytes.starts_with(b"-----BEGIN") {
        return bytes
            .try_into()
            .map_err(|_| Error::PublicKeyLength(bytes.len()));
    }
    let pem = pem::parse(bytes)?;
    let key = match pem.tag() {
        "PUBLIC KEY" => RsaPublicKey::from_public_key_der(pem.contents()).map_err(Error::Spki)?,
        "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_der(pem.contents()).map_err(Error::Pkcs1)?,
        tag => return Err(Error::UnsupportedTag(tag.to_owned())),
    };
    check_public_parts(key.n(), key.e())?;
    Ok(to_le(key.n()))
}

fn check_public_parts(n: &BigUint, e: &BigUint) -> Result<(), Error> {
    if n.bits() != 8 * RSA_BYTES {
        return Err(Error::KeySize(n.bits()));
    }
    if e != &BigUint::from(PUBLIC_EXPONENT) {
        return Err(Error::PublicExponent(e.clone()));
    }
    Ok(())
}

/// Values here are always below a 2048-bit modulus, so they fit.
fn to_le(x: &BigUint) -> [u8; RSA_BYTES] {
    let bytes = x.to_bytes_le();
    let mut out = [0u8; RSA_BYTES];
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

#[derive(Debug)]
pub enum Error {
    InvalidKey(rsa::Error),
    KeySize(usize),
    Pem(pem::PemError),
    Pkcs1(rsa::pkcs1::Error),
    Pkcs8(rsa::pkcs8::Error),
    PublicExponent(BigUint),
    PublicKeyLength(usize),
    Spki(rsa::pkcs8::spki::Error),
    UnsupportedTag(String),
}

impl From<pem::PemError> for Error {
    fn from(e: pem::PemError) -> Self {
        Error::Pem(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidKey(e) => write!(f, "inconsistent key: {e}"),
            Error::KeySize(bits) => write!(f, "{bits}-bit key, expected {}", 8 * RSA_BYTES),
            Error::Pem(e) => write!(f, "pem parse error: {e}"),
            Error::Pkcs1(e) => write!(f, "pkcs#1 decode error: {e}"),
            Error::Pkcs8(e) => write!(f, "pkcs#8 decode error: {e}"),
            Error::PublicExponent(e) => {
                write!(f, "public exponent {e}, expected {PUBLIC_EXPONENT}")
            }
            Error::PublicKeyLength(len) => {
                write!(f, "public key file is {len} bytes, expected {RSA_BYTES}")
            }
            Error::Spki(e) => write!(f, "public key decode error: {e}"),
            Error::UnsupportedTag(tag) => write!(f, r#"unsupported pem label "{tag}""#),
        }
    }
}

impl std::error::Error for Error {}
