// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Entry points the kernel calls into the bootloader through, published at
//! `consts::API_TABLE_ADDR`.
//!
//! Flash calls return 0 on success or a negative [`FlashError`] code.
//! `verify_os_update` returns the update result code (0 on success).
//! `rsa_step` returns 1 while more steps remain, 0 once the block has been
//! written to `out`, and -1 if the signature cannot be decoded.

use boot_core::flash::{FlashError, FlashKeys, KeyedFlash, Programmer, RegionTable};
use core::task::Poll;

use boot_core::rsa::{Limbs, PubKey, RsaState, RSA_STATE_SIZE};
use boot_core::{Board, BootloaderApi, VERSION};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::peripherals::NVMC;

use crate::board::NrfBoard;
use crate::{PUB_KEYS, REGIONS};

#[repr(C)]
pub struct ApiTable {
    pub version: u32,
    pub reboot: extern "C" fn() -> !,
    pub serial_number: unsafe extern "C" fn(buf: *mut u32, len: usize) -> usize,
    pub program_data_store: unsafe extern "C" fn(dst: u32, src: *const u8, len: usize, key1: u32, key2: u32) -> i32,
    pub erase_data_store: extern "C" fn(key1: u32, key2: u32) -> i32,
    pub program_shared: unsafe extern "C" fn(dst: u32, src: *const u8, len: usize, key1: u32, key2: u32) -> i32,
    pub erase_shared: extern "C" fn(key1: u32, key2: u32) -> i32,
    pub pub_keys: unsafe extern "C" fn(count: *mut usize) -> *const PubKey,
    /// Bytes to reserve for the state passed to `rsa_init` and `rsa_step`.
    pub rsa_state_size: usize,
    pub rsa_init: unsafe extern "C" fn(state: *mut RsaState, sig: *const Limbs, modulus: *const Limbs),
    pub rsa_step: unsafe extern "C" fn(state: *mut RsaState, out: *mut Limbs) -> i32,
    pub rsa_public: unsafe extern "C" fn(sig: *const Limbs, modulus: *const Limbs, out: *mut Limbs) -> i32,
    pub sha256: unsafe extern "C" fn(data: *const u8, len: usize, out: *mut [u8; 32]),
    pub verify_os_update: extern "C" fn(key1: u32, key2: u32) -> u8,
}

#[used]
#[link_section = ".api_table"]
pub static API_TABLE: ApiTable = ApiTable {
    version: VERSION,
    reboot,
    serial_number,
    program_data_store,
    erase_data_store,
    program_shared,
    erase_shared,
    pub_keys,
    rsa_state_size: RSA_STATE_SIZE,
    rsa_init,
    rsa_step,
    rsa_public,
    sha256,
    verify_os_update,
};

type Api = BootloaderApi<'static, KeyedFlash<Nvmc<'static>>, NrfBoard>;

/// The table was checked at boot, so `None` never reaches the kernel in practice.
fn with_api<R>(f: impl FnOnce(&mut Api) -> R) -> Option<R> {
    let table = RegionTable::new(&REGIONS).ok()?;
    // SAFETY: the bootloader has handed over control, so the kernel's call is
    // the only user of the NVMC.
    let nvmc = Nvmc::new(unsafe { NVMC::steal() });
    let mut api = BootloaderApi::new(Programmer::new(KeyedFlash::new(nvmc), table), &PUB_KEYS, NrfBoard);
    Some(f(&mut api))
}

fn flash_code(err: FlashError) -> i32 {
    match err {
        FlashError::TypeMismatch => -1,
        FlashError::IllegalBits => -2,
        FlashError::Readback => -3,
        FlashError::Locked => -4,
        FlashError::BadRegionTable => -5,
        FlashError::Platform => -6,
    }
}

fn flash_status(result: Option<Result<(), FlashError>>) -> i32 {
    match result {
        Some(Ok(())) => 0,
        Some(Err(e)) => flash_code(e),
        None => flash_code(FlashError::BadRegionTable),
    }
}

extern "C" fn reboot() -> ! {
    NrfBoard.reboot()
}

unsafe extern "C" fn serial_number(buf: *mut u32, len: usize) -> usize {
    let buf = core::slice::from_raw_parts_mut(buf, len);
    with_api(|api| api.serial_number(buf)).unwrap_or(0)
}

unsafe extern "C" fn program_data_store(dst: u32, src: *const u8, len: usize, key1: u32, key2: u32) -> i32 {
    let src = core::slice::from_raw_parts(src, len);
    let keys = FlashKeys::new(key1, key2);
    flash_status(with_api(|api| api.program_data_store(dst, src, &keys)))
}

extern "C" fn erase_data_store(key1: u32, key2: u32) -> i32 {
    let keys = FlashKeys::new(key1, key2);
    flash_status(with_api(|api| api.erase_data_store(&keys)))
}

unsafe extern "C" fn program_shared(dst: u32, src: *const u8, len: usize, key1: u32, key2: u32) -> i32 {
    let src = core::slice::from_raw_parts(src, len);
    let keys = FlashKeys::new(key1, key2);
    flash_status(with_api(|api| api.program_shared(dst, src, &keys)))
}

extern "C" fn erase_shared(key1: u32, key2: u32) -> i32 {
    let keys = FlashKeys::new(key1, key2);
    flash_status(with_api(|api| api.erase_shared(&keys)))
}

unsafe extern "C" fn pub_keys(count: *mut usize) -> *const PubKey {
    *count = PUB_KEYS.len();
    PUB_KEYS.as_ptr()
}

/// `state` must point to [`RSA_STATE_SIZE`] word-aligned bytes owned by the
/// caller until the operation is done.
unsafe extern "C" fn rsa_init(state: *mut RsaState, sig: *const Limbs, modulus: *const Limbs) {
    state.write(RsaState::new(&*sig, &*modulus));
}

unsafe extern "C" fn rsa_step(state: *mut RsaState, out: *mut Limbs) -> i32 {
    let state = &mut *state;
    match state.step() {
        Poll::Pending => 1,
        Poll::Ready(Ok(())) => match state.output() {
            Some(block) => {
                *out = *block;
                0
            }
            None => -1,
        },
        Poll::Ready(Err(_)) => -1,
    }
}

/// Runs the public-key operation to completion in one call.
unsafe extern "C" fn rsa_public(sig: *const Limbs, modulus: *const Limbs, out: *mut Limbs) -> i32 {
    let mut state = RsaState::new(&*sig, &*modulus);
    match state.run() {
        Ok(result) => {
            *out = *result;
            0
        }
        Err(_) => -1,
    }
}

unsafe extern "C" fn sha256(data: *const u8, len: usize, out: *mut [u8; 32]) {
    *out = boot_core::hash::sha256(core::slice::from_raw_parts(data, len));
}

extern "C" fn verify_os_update(key1: u32, key2: u32) -> u8 {
    let keys = FlashKeys::new(key1, key2);
    match with_api(|api| api.verify_os_update(&keys)) {
        Some(Ok(())) => boot_core::update::SUCCESS,
        Some(Err(e)) => e.code(),
        None => boot_core::UpdateError::HdrCheckFailed.code(),
    }
}
