// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Services the bootloader keeps offering to the kernel after boot.

use crate::boot::{self, BootConfig};
use crate::flash::{FlashError, FlashKeys, PlatformFlash, Programmer, RegionType};
use crate::hash::{sha256, SHA256_SIZE};
use crate::protocol::Transport;
use crate::rsa::{Limbs, PubKey, RsaState};
use crate::update::{verify, UpdateError};
use crate::VERSION;

/// Board specific operations.
pub trait Board {
    /// Writes the device serial number into `buf`, returns the number of
    /// words written.
    fn serial_number(&self, buf: &mut [u32]) -> usize;

    fn reboot(&mut self) -> !;
}

pub struct BootloaderApi<'a, P, B> {
    prog: Programmer<'a, P>,
    pub_keys: &'a [PubKey],
    board: B,
}

impl<'a, P: PlatformFlash, B: Board> BootloaderApi<'a, P, B> {
    pub fn new(prog: Programmer<'a, P>, pub_keys: &'a [PubKey], board: B) -> Self {
        Self { prog, pub_keys, board }
    }

    pub fn version(&self) -> u32 {
        VERSION
    }

    pub fn reboot(&mut self) -> ! {
        self.board.reboot()
    }

    pub fn serial_number(&self, buf: &mut [u32]) -> usize {
        self.board.serial_number(buf)
    }

    pub fn program_data_store(&mut self, dst: u32, src: &[u8], keys: &FlashKeys) -> Result<(), FlashError> {
        self.prog.program_typed(dst, src, RegionType::DataStore, keys)
    }

    pub fn erase_data_store(&mut self, keys: &FlashKeys) -> Result<(), FlashError> {
        self.prog.erase_typed(RegionType::DataStore, keys)
    }

    pub fn program_shared(&mut self, dst: u32, src: &[u8], keys: &FlashKeys) -> Result<(), FlashError> {
        self.prog.program_typed(dst, src, RegionType::Shared, keys)
    }

    pub fn erase_shared(&mut self, keys: &FlashKeys) -> Result<(), FlashError> {
        self.prog.erase_typed(RegionType::Shared, keys)
    }

    pub fn pub_keys(&self) -> &'a [PubKey] {
        self.pub_keys
    }

    /// Starts an RSA public operation the caller then drives with
    /// [`RsaState::step`].
    pub fn rsa_state(&self, sig: &Limbs, modulus: &Limbs) -> RsaState {
        RsaState::new(sig, modulus)
    }

    pub fn sha256(&self, data: &[u8]) -> [u8; SHA256_SIZE] {
        sha256(data)
    }

    /// Verifies the update staged at the start of the shared area.
    pub fn verify_os_update(&mut self, keys: &FlashKeys) -> Result<(), UpdateError> {
        let shared = self
            .prog
            .table()
            .first(RegionType::Shared)
            .ok_or(UpdateError::HdrCheckFailed)?;
        verify(&mut self.prog, self.pub_keys, shared.base, keys)
    }

    /// Runs the boot decision loop until a kernel is present.
    pub fn boot<T: Transport>(&mut self, port: &mut T, config: BootConfig, keys: &FlashKeys) {
        boot::run(&mut self.prog, self.pub_keys, keys, port, config)
    }

    pub fn programmer(&mut self) -> &mut Programmer<'a, P> {
        &mut self.prog
    }
}
