// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Boot decision loop: listen for an update, verify whatever is staged,
//! apply or discard it, and repeat until there is a kernel to start.

use consts::{ERASED_WORD, KERNEL_ENTRY_OFFSET};

use crate::flash::{FlashKeys, PlatformFlash, Programmer, RegionType};
use crate::protocol::{Session, Transport};
use crate::rsa::PubKey;
use crate::update::{apply, verify, UpdateError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootConfig {
    /// Wait for the host without timeout on the first pass.
    pub force_update: bool,
}

/// What one pass of the loop did with the staging area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PassOutcome {
    /// Nothing that looks like an update is staged
    Nothing,
    Applied,
    /// A staged update failed and the staging area was erased
    Discarded(UpdateError),
    /// Flash failed part way; the staged update is kept for the next pass
    Retained(UpdateError),
}

/// Whether the kernel's reset vector has been programmed.
pub fn kernel_present<P: PlatformFlash>(prog: &mut Programmer<'_, P>) -> bool {
    let Some(kernel) = prog.table().first(RegionType::Kernel) else {
        return false;
    };
    matches!(prog.read_word(kernel.base + KERNEL_ENTRY_OFFSET), Ok(w) if w != ERASED_WORD)
}

/// One session followed by one verify/apply decision.
pub fn pass<P: PlatformFlash, T: Transport>(
    prog: &mut Programmer<'_, P>,
    pub_keys: &[PubKey],
    keys: &FlashKeys,
    port: &mut T,
    forced: bool,
) -> PassOutcome {
    let end = Session::new(prog, pub_keys, keys).run(port, forced);
    debug!("session over: {:?}", end);

    let Some(shared) = prog.table().first(RegionType::Shared) else {
        return PassOutcome::Nothing;
    };
    let result = verify(prog, pub_keys, shared.base, keys).and_then(|()| apply(prog, shared.base, keys));
    match result {
        Ok(()) => PassOutcome::Applied,
        Err(UpdateError::HdrCheckFailed) => PassOutcome::Nothing,
        Err(e @ UpdateError::Flash(_)) => {
            warn!("flash failed during update: {:?}", e);
            PassOutcome::Retained(e)
        }
        Err(e) => {
            warn!("discarding staged update: {:?}", e);
            if let Err(e) = prog.erase_typed(RegionType::Shared, keys) {
                warn!("erasing staging area failed: {:?}", e);
            }
            PassOutcome::Discarded(e)
        }
    }
}

/// Runs passes until a kernel is present. Always runs at least one.
pub fn run<P: PlatformFlash, T: Transport>(
    prog: &mut Programmer<'_, P>,
    pub_keys: &[PubKey],
    keys: &FlashKeys,
    port: &mut T,
    config: BootConfig,
) {
    let mut forced = config.force_update;
    loop {
        let outcome = pass(prog, pub_keys, keys, port, forced);
        forced = false;
        if kernel_present(prog) {
            info!("kernel present after {:?}", outcome);
            return;
        }
    }
}
