// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::task::Poll;

use super::*;
use crate::api::{Board, BootloaderApi};
use crate::flash::FlashError;
use crate::rsa::{limbs_from_le, limbs_to_le};
use crate::update::UpdateError;
use crate::VERSION;

struct FakeBoard;

impl Board for FakeBoard {
    fn serial_number(&self, buf: &mut [u32]) -> usize {
        let serial = [0x1234_5678, 0x9ABC_DEF0];
        let n = buf.len().min(serial.len());
        buf[..n].copy_from_slice(&serial[..n]);
        n
    }

    fn reboot(&mut self) -> ! {
        panic!("reboot requested");
    }
}

#[test]
fn reports_version_serial_and_keys() {
    let keys = known_keys();
    let api = BootloaderApi::new(programmer(), &keys, FakeBoard);
    assert_eq!(api.version(), VERSION);
    assert_eq!(api.pub_keys(), &keys[..]);

    let mut serial = [0u32; 4];
    assert_eq!(api.serial_number(&mut serial), 2);
    assert_eq!(serial, [0x1234_5678, 0x9ABC_DEF0, 0, 0]);
}

#[test]
#[should_panic(expected = "reboot requested")]
fn reboot_goes_to_the_board() {
    let keys = known_keys();
    let mut api = BootloaderApi::new(programmer(), &keys, FakeBoard);
    api.reboot();
}

#[test]
fn sha256_primitive() {
    let keys = known_keys();
    let api = BootloaderApi::new(programmer(), &keys, FakeBoard);
    assert_eq!(
        api.sha256(b"abc"),
        [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae, 0x22, 0x23, 0xb0, 0x03,
            0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
        ]
    );
}

#[test]
fn rsa_primitive_is_driven_by_the_caller() {
    let keys = known_keys();
    let api = BootloaderApi::new(programmer(), &keys, FakeBoard);
    let signer = signer();

    let mut block = [0x5Au8; RSA_BYTES];
    block[RSA_BYTES - 1] = 0;
    let sig = limbs_from_le(&signer.sign_block(&block));
    let n = limbs_from_le(&keys[0]);

    let mut rsa = api.rsa_state(&sig, &n);
    while rsa.step().is_pending() {}
    assert_eq!(rsa.step(), Poll::Ready(Ok(())));
    assert_eq!(rsa.output().map(limbs_to_le), Some(block));
}

#[test]
fn data_store_is_the_only_target_of_data_store_calls() {
    let keys = known_keys();
    let mut api = BootloaderApi::new(programmer(), &keys, FakeBoard);

    api.program_data_store(DATA_BASE + 8, b"settings", &UNLOCK).unwrap();
    assert_eq!(
        api.program_data_store(KERNEL_BASE, b"settings", &UNLOCK),
        Err(FlashError::TypeMismatch)
    );
    assert_eq!(&ram(api.programmer())[DATA_BASE as usize + 8..][..8], b"settings");

    api.erase_data_store(&UNLOCK).unwrap();
    assert_eq!(&ram(api.programmer())[DATA_BASE as usize + 8..][..8], &[0xFF; 8]);
}

#[test]
fn kernel_can_stage_and_verify_an_update() {
    let keys = known_keys();
    let mut api = BootloaderApi::new(programmer(), &keys, FakeBoard);
    let image = sealed(&payload(256), &signer());

    assert_eq!(
        api.program_shared(DATA_BASE, &image[..16], &UNLOCK),
        Err(FlashError::TypeMismatch)
    );
    api.program_shared(SHARED_BASE, &image, &UNLOCK).unwrap();
    assert_eq!(api.verify_os_update(&UNLOCK), Err(UpdateError::HdrMarkerInvalid));

    mark_update(api.programmer(), SHARED_BASE, Marker::InProgress, Marker::Downloaded, &UNLOCK).unwrap();
    assert_eq!(api.verify_os_update(&UNLOCK), Ok(()));
    assert_eq!(marker(api.programmer()), Marker::Verified as u8);

    api.erase_shared(&UNLOCK).unwrap();
    assert_eq!(api.verify_os_update(&UNLOCK), Err(UpdateError::HdrCheckFailed));
}
