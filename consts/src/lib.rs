// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory map and constants shared by the bootloader, its core library and
//! the host tools.

#![no_std]

/// Total flash size of the nRF52805 (192 KiB).
pub const FLASH_SIZE: u32 = 0x30000;

/// Size of a flash page in bytes (4KB). Erase granularity of the NVMC.
pub const FLASH_PAGE: u32 = 4096;

/// The Nordic MBR occupies the first page and is not described by the
/// region table; nothing in this project ever writes it.
pub const MBR_SIZE: u32 = 0x1000;

/// Kernel (resident application) code. The Cortex-M vector table of the
/// kernel sits at its base.
pub const KERNEL_BASE: u32 = 0x01000;
pub const KERNEL_SIZE: u32 = 0x13000;

/// Shared staging area the host writes updates into.
pub const SHARED_BASE: u32 = 0x14000;
pub const SHARED_SIZE: u32 = 0x13000;

/// EEPROM-equivalent data store, two pages.
pub const DATA_STORE_BASE: u32 = 0x27000;
pub const DATA_STORE_SIZE: u32 = 0x2000;

/// The bootloader itself. This address is also stored in UICR so the MBR
/// starts us instead of the kernel.
pub const BOOTLOADER_BASE: u32 = 0x29000;
pub const BOOTLOADER_SIZE: u32 = 0x7000;

/// The kernel finds the bootloader entry points in a table at the top of the
/// bootloader region.
pub const API_TABLE_SIZE: u32 = 0x100;
pub const API_TABLE_ADDR: u32 = BOOTLOADER_BASE + BOOTLOADER_SIZE - API_TABLE_SIZE;

/// Offset of the reset vector inside the kernel vector table. While this word
/// still reads as erased flash there is no kernel to boot.
pub const KERNEL_ENTRY_OFFSET: u32 = 4;

/// Value of a word of erased flash.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// First half of the flash unlock capability.
pub const FLASH_KEY1: u32 = 0x4567_0123;

/// Second half of the flash unlock capability.
pub const FLASH_KEY2: u32 = 0xCDEF_89AB;

/// How long the bootloader listens for a host before giving up on a session.
pub const HOST_IDLE_TIMEOUT_MS: u64 = 300;

/// Baudrate of the update UART.
pub const UART_BAUDRATE: u32 = 115_200;
