// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Update protocol transport over UARTE0.

use boot_core::protocol::Transport;
use consts::HOST_IDLE_TIMEOUT_MS;
use embassy_futures::block_on;
use embassy_nrf::buffered_uarte::BufferedUarte;
use embassy_nrf::peripherals::{TIMER0, UARTE0};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};

pub struct UartTransport<'d> {
    uart: BufferedUarte<'d, UARTE0, TIMER0>,
}

impl<'d> UartTransport<'d> {
    pub fn new(uart: BufferedUarte<'d, UARTE0, TIMER0>) -> Self {
        Self { uart }
    }

    /// Waits until everything written has left the wire.
    pub fn flush(&mut self) {
        let _ = block_on(self.uart.flush());
    }

    async fn read_byte(&mut self) -> Option<u8> {
        let mut b = [0u8; 1];
        match self.uart.read(&mut b).await {
            Ok(1) => Some(b[0]),
            _ => None,
        }
    }
}

impl Transport for UartTransport<'_> {
    fn poll(&mut self) -> Option<u8> {
        let timeout = Duration::from_millis(HOST_IDLE_TIMEOUT_MS);
        block_on(with_timeout(timeout, self.read_byte())).ok().flatten()
    }

    fn read(&mut self) -> Option<u8> {
        block_on(self.read_byte())
    }

    fn write(&mut self, byte: u8) {
        if block_on(self.uart.write_all(&[byte])).is_err() {
            defmt::warn!("uart write failed");
        }
    }
}
