// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RSA-2048 public operation (e = 65537) as a step function.
//!
//! One call to [`RsaState::step`] does one 32-bit limb worth of one modular
//! multiplication, so the caller decides how the work is spread out. A full
//! operation is 16 squarings followed by one multiplication by the signature,
//! 64 steps each, plus one setup step.
//!
//! The state owns its operands and has a C layout, so a kernel can hold one
//! in its own memory and step it through the capability table.

use core::task::Poll;

/// Number of 32-bit limbs in a 2048-bit integer.
pub const RSA_LIMBS: usize = 64;
pub const RSA_BYTES: usize = RSA_LIMBS * 4;

/// A 2048-bit integer, least significant limb first.
pub type Limbs = [u32; RSA_LIMBS];

/// An RSA modulus as stored on flash and in the key table, little-endian.
pub type PubKey = [u8; RSA_BYTES];

const SQUARINGS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RsaError {
    /// Signature is not smaller than the modulus
    SignatureTooLarge,
    /// Modulus is even or has no top limb
    BadModulus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, u8)]
enum Phase {
    Init,
    Multiply { op: u8, limb: u8 },
    Done,
    Failed(RsaError),
}

/// Working state of one `sig^65537 mod n` computation.
#[derive(Clone)]
#[repr(C)]
pub struct RsaState {
    sig: Limbs,
    modulus: Limbs,
    acc: Limbs,
    prod: Limbs,
    phase: Phase,
}

/// Bytes a caller outside Rust must reserve for one [`RsaState`], word
/// aligned.
pub const RSA_STATE_SIZE: usize = core::mem::size_of::<RsaState>();

impl RsaState {
    pub fn new(sig: &Limbs, modulus: &Limbs) -> Self {
        Self {
            sig: *sig,
            modulus: *modulus,
            acc: [0; RSA_LIMBS],
            prod: [0; RSA_LIMBS],
            phase: Phase::Init,
        }
    }

    /// Advances the computation by one step. Once `Ready` is returned, every
    /// further call returns the same result.
    pub fn step(&mut self) -> Poll<Result<(), RsaError>> {
        match self.phase {
            Phase::Init => {
                if self.modulus[RSA_LIMBS - 1] == 0 || self.modulus[0] & 1 == 0 {
                    return self.fail(RsaError::BadModulus);
                }
                if !less_than(&self.sig, &self.modulus) {
                    return self.fail(RsaError::SignatureTooLarge);
                }
                self.acc = self.sig;
                self.prod = [0; RSA_LIMBS];
                self.phase = Phase::Multiply { op: 0, limb: 0 };
                Poll::Pending
            }
            Phase::Multiply { op, limb } => {
                // Multiplier limbs are consumed most significant first.
                let word = self.acc[RSA_LIMBS - 1 - limb as usize];
                let multiplicand = if op < SQUARINGS { &self.acc } else { &self.sig };
                mul_limb(&mut self.prod, word, multiplicand, &self.modulus);

                if (limb as usize) + 1 < RSA_LIMBS {
                    self.phase = Phase::Multiply { op, limb: limb + 1 };
                    return Poll::Pending;
                }
                self.acc = self.prod;
                self.prod = [0; RSA_LIMBS];
                if op < SQUARINGS {
                    self.phase = Phase::Multiply { op: op + 1, limb: 0 };
                    Poll::Pending
                } else {
                    self.phase = Phase::Done;
                    Poll::Ready(Ok(()))
                }
            }
            Phase::Done => Poll::Ready(Ok(())),
            Phase::Failed(e) => Poll::Ready(Err(e)),
        }
    }

    /// The decoded block, once [`step`](Self::step) has returned `Ready(Ok)`.
    pub fn output(&self) -> Option<&Limbs> {
        match self.phase {
            Phase::Done => Some(&self.acc),
            _ => None,
        }
    }

    /// Drives [`step`](Self::step) to completion.
    pub fn run(&mut self) -> Result<&Limbs, RsaError> {
        loop {
            match self.step() {
                Poll::Pending => {}
                Poll::Ready(Ok(())) => return Ok(&self.acc),
                Poll::Ready(Err(e)) => return Err(e),
            }
        }
    }

    fn fail(&mut self, e: RsaError) -> Poll<Result<(), RsaError>> {
        self.phase = Phase::Failed(e);
        Poll::Ready(Err(e))
    }
}

pub fn limbs_from_le(bytes: &[u8; RSA_BYTES]) -> Limbs {
    let mut limbs = [0u32; RSA_LIMBS];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.chunks_exact(4)) {
        *limb = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    limbs
}

pub fn limbs_to_le(limbs: &Limbs) -> [u8; RSA_BYTES] {
    let mut bytes = [0u8; RSA_BYTES];
    for (chunk, limb) in bytes.chunks_exact_mut(4).zip(limbs) {
        chunk.copy_from_slice(&limb.to_le_bytes());
    }
    bytes
}

/// `prod = prod * 2^32 + word * b (mod n)`, one bit at a time from the top.
/// Requires `prod < n` and `b < n`; keeps `prod < n`.
fn mul_limb(prod: &mut Limbs, word: u32, b: &Limbs, n: &Limbs) {
    for bit in (0..32).rev() {
        let carry = shl1(prod);
        if carry || !less_than(prod, n) {
            sub_assign(prod, n);
        }
        if (word >> bit) & 1 == 1 {
            let carry = add_assign(prod, b);
            if carry || !less_than(prod, n) {
                sub_assign(prod, n);
            }
        }
    }
}

fn less_than(a: &Limbs, b: &Limbs) -> bool {
    for (x, y) in a.iter().rev().zip(b.iter().rev()) {
        if x != y {
            return x < y;
        }
    }
    false
}

fn shl1(a: &mut Limbs) -> bool {
    let mut carry = 0;
    for limb in a.iter_mut() {
        let next = *limb >> 31;
        *limb = (*limb << 1) | carry;
        carry = next;
    }
    carry != 0
}

fn add_assign(a: &mut Limbs, b: &Limbs) -> bool {
    let mut carry = 0u64;
    for (x, y) in a.iter_mut().zip(b) {
        let sum = *x as u64 + *y as u64 + carry;
        *x = sum as u32;
        carry = sum >> 32;
    }
    carry != 0
}

/// Wrapping subtraction. When the true value overflowed 2^2048 the wrap
/// brings it back to the right residue.
fn sub_assign(a: &mut Limbs, b: &Limbs) {
    let mut borrow = false;
    for (x, y) in a.iter_mut().zip(b) {
        let (d1, b1) = x.overflowing_sub(*y);
        let (d2, b2) = d1.overflowing_sub(borrow as u32);
        *x = d2;
        borrow = b1 || b2;
    }
}
