// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! OS update bootloader core.
//!
//! Decides whether the image staged in the shared flash area is authentic
//! and undamaged and, only if so, copies it over the kernel. The pieces:
//!
//! - [`flash`]: the typed region table and the programmer that only ever
//!   clears bits inside the region type it was asked for.
//! - [`rsa`] and [`hash`]: iterative RSA-2048 public operation and SHA-256.
//! - [`header`] and [`update`]: the update header, its marker state machine
//!   and the verifier.
//! - [`protocol`]: the serial command loop the host uses to fill the staging
//!   area.
//! - [`boot`]: the boot decision loop.
//! - [`api`]: the operations the booted kernel may call back into.
//!
//! Everything works on an injected region table and an injected flash, so
//! the same code runs on the MCU and against [`ram::RamFlash`] on a host.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod api;
pub mod boot;
pub mod flash;
pub mod hash;
pub mod header;
pub mod image;
pub mod protocol;
#[cfg(any(test, feature = "ram-flash"))]
pub mod ram;
pub mod rsa;
pub mod update;

#[cfg(test)]
mod tests;

pub use api::{Board, BootloaderApi};
pub use flash::{FlashError, FlashKeys, FlashRegion, KeyedFlash, PlatformFlash, Programmer, RegionTable, RegionType};
pub use header::{Marker, OsUpdateHdr};
pub use rsa::{PubKey, RsaState};
pub use update::UpdateError;

/// Version reported through the capability table.
pub const VERSION: u32 = 0x0001_0000;
