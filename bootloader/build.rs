// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generates `memory.x` from the memory map in `consts` and puts it where
//! the linker finds it.

use consts::{API_TABLE_ADDR, API_TABLE_SIZE, BOOTLOADER_BASE, FLASH_SIZE};
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    let memory_x_content = format!(
        r##"
        BOOTLOADER_BASE = {BOOTLOADER_BASE:#X};
        API_TABLE_ADDR = {API_TABLE_ADDR:#X};

        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            /* The bootloader is the last region of flash, minus the entry point table */
            FLASH (rx) : ORIGIN = BOOTLOADER_BASE, LENGTH = API_TABLE_ADDR - BOOTLOADER_BASE
            api_table (r) : ORIGIN = API_TABLE_ADDR, LENGTH = {API_TABLE_SIZE:#X}
            RAM : ORIGIN = 0x20000008, LENGTH = 24K - 8
            mbr_uicr_bootloader_addr (r) : ORIGIN = 0x10001014, LENGTH = 0x4
            uicr_approtect (r) : ORIGIN = 0x10001208, LENGTH = 0x4
        }}

        SECTIONS {{
            .api_table : {{
                KEEP(*(.api_table))
            }} > api_table

            .uicr_approtect :  {{
                KEEP(*(.uicr_approtect))
                . = ALIGN(4);
            }} > uicr_approtect

            .mbr_uicr_bootloader_addr :  {{
                KEEP(*(.mbr_uicr_bootloader_addr))
                . = ALIGN(4);
            }} > mbr_uicr_bootloader_addr
        }};

        ASSERT(API_TABLE_ADDR + {API_TABLE_SIZE:#X} == {FLASH_SIZE:#X}, "entry point table must end flash");
        "##
    );
    let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR set by cargo"));
    File::create(out.join("memory.x"))
        .and_then(|mut f| f.write_all(memory_x_content.as_bytes()))
        .expect("write memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    // Layout only changes with the memory map or the development key.
    println!("cargo:rerun-if-changed=../consts/src/lib.rs");
    println!("cargo:rerun-if-changed=keys/dev.pub");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
