// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use boot_core::Board;
use cortex_m::peripheral::SCB;
use nrf52805_pac::FICR;

/// nRF52805 board services.
pub struct NrfBoard;

impl Board for NrfBoard {
    /// The 64-bit FICR device id.
    fn serial_number(&self, buf: &mut [u32]) -> usize {
        // SAFETY: FICR is read-only factory information.
        let ficr = unsafe { &*FICR::ptr() };
        let n = buf.len().min(ficr.deviceid.len());
        for (i, word) in buf[..n].iter_mut().enumerate() {
            *word = ficr.deviceid[i].read().bits();
        }
        n
    }

    fn reboot(&mut self) -> ! {
        SCB::sys_reset()
    }
}
