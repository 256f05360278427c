// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

mod api_table;
mod board;
mod jump_app;
mod uart;

// global logger
use defmt_rtt as _;
// time driver
use embassy_nrf as _;
use panic_probe as _;

use boot_core::boot::BootConfig;
use boot_core::flash::{FlashKeys, FlashRegion, KeyedFlash, Programmer, RegionTable, RegionType};
use boot_core::rsa::PubKey;
use boot_core::BootloaderApi;
use consts::{
    BOOTLOADER_BASE, BOOTLOADER_SIZE, DATA_STORE_BASE, DATA_STORE_SIZE, FLASH_KEY1, FLASH_KEY2, KERNEL_BASE, KERNEL_SIZE,
    SHARED_BASE, SHARED_SIZE, UART_BAUDRATE,
};
use defmt::info;
use embassy_nrf::buffered_uarte::{self, BufferedUarte};
use embassy_nrf::gpio::{Input, Pull};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::{bind_interrupts, peripherals, uarte};

use board::NrfBoard;
use jump_app::jump_to_kernel;
use uart::UartTransport;

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => buffered_uarte::InterruptHandler<peripherals::UARTE0>;
});

/// Tells the MBR to start the bootloader instead of the kernel.
#[used]
#[link_section = ".mbr_uicr_bootloader_addr"]
pub static BOOTLOADER_ADDR: u32 = BOOTLOADER_BASE;

#[cfg(feature = "no-dbg-access")]
#[used]
#[link_section = ".uicr_approtect"]
pub static APP_PROTECTION: u32 = 0xFFFF_FF00;

/// Flash layout. The MBR page below the kernel is not listed, so nothing can
/// program it.
pub static REGIONS: [FlashRegion; 4] = [
    FlashRegion::new(KERNEL_BASE, KERNEL_SIZE, RegionType::Kernel),
    FlashRegion::new(SHARED_BASE, SHARED_SIZE, RegionType::Shared),
    FlashRegion::new(DATA_STORE_BASE, DATA_STORE_SIZE, RegionType::DataStore),
    FlashRegion::new(BOOTLOADER_BASE, BOOTLOADER_SIZE, RegionType::Bootloader),
];

/// Moduli of the keys updates may be signed with.
pub static PUB_KEYS: [PubKey; 1] = [*include_bytes!("../keys/dev.pub")];

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = embassy_nrf::init(Default::default());
    info!("bootloader {=u32:#x}", boot_core::VERSION);

    let table = match RegionTable::new(&REGIONS) {
        Ok(table) => table,
        Err(e) => defmt::panic!("region table: {}", e),
    };

    let mut config_uart = uarte::Config::default();
    config_uart.parity = uarte::Parity::EXCLUDED;
    config_uart.baudrate = match UART_BAUDRATE {
        460_800 => uarte::Baudrate::BAUD460800,
        _ => uarte::Baudrate::BAUD115200,
    };

    // Buffers must be in RAM and outlive the uart, which lives until the jump.
    let mut rx_buffer = [0u8; 512];
    let mut tx_buffer = [0u8; 64];
    let uart = BufferedUarte::new(
        p.UARTE0,
        p.TIMER0,
        p.PPI_CH0,
        p.PPI_CH1,
        p.PPI_GROUP0,
        Irqs,
        p.P0_16,
        p.P0_18,
        config_uart,
        &mut rx_buffer,
        &mut tx_buffer,
    );
    let mut port = UartTransport::new(uart);

    // Held low at reset to wait for an update even with a kernel present.
    let boot_gpio = Input::new(p.P0_11, Pull::Up);
    let config = BootConfig {
        force_update: cfg!(feature = "force-update") || boot_gpio.is_low(),
    };

    let keys = FlashKeys::new(FLASH_KEY1, FLASH_KEY2);
    let prog = Programmer::new(KeyedFlash::new(Nvmc::new(p.NVMC)), table);
    let mut api = BootloaderApi::new(prog, &PUB_KEYS, NrfBoard);
    api.boot(&mut port, config, &keys);

    info!("booting kernel at {=u32:#x}", KERNEL_BASE);
    port.flush();
    drop(port);
    // SAFETY: the boot loop only returns once a kernel is present.
    unsafe { jump_to_kernel() }
}
