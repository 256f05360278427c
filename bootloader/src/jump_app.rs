// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::KERNEL_BASE;
use cortex_m::peripheral::NVIC;
use defmt::info;
use embassy_nrf::interrupt::Interrupt;

/// Boots the kernel at [`KERNEL_BASE`].
///
/// # Safety
///
/// Only call once the kernel has been verified present. This never returns
/// and replaces the stack pointer with the kernel's.
pub unsafe fn jump_to_kernel() -> ! {
    use nrf_softdevice_mbr as mbr;

    // Interrupts the bootloader used must not fire into the kernel.
    NVIC::mask(Interrupt::UARTE0_UART0);
    NVIC::mask(Interrupt::RTC1);

    critical_section::with(|_| {
        // The MBR forwards interrupts to the bootloader while UICR points at
        // it; from now on they go to the kernel vector table.
        let mut cmd = mbr::sd_mbr_command_t {
            command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_IRQ_FORWARD_ADDRESS_SET,
            params: mbr::sd_mbr_command_t__bindgen_ty_1 {
                irq_forward_address_set: mbr::sd_mbr_command_irq_forward_address_set_t { address: KERNEL_BASE },
            },
        };
        let ret = mbr::sd_mbr_command(&mut cmd);
        info!("irq forward to {=u32:#x}: {}", KERNEL_BASE, ret);

        let msp = *(KERNEL_BASE as *const u32);
        let rv = *((KERNEL_BASE + 4) as *const u32);
        info!("msp = {=u32:x}, rv = {=u32:x}", msp, rv);

        // * Use MSP as stack pointer (clear spsel bit)
        // * Synchronize instruction barrier
        // * Load the kernel's initial stack pointer
        // * Set link register to not return
        // * Jump to the kernel reset vector
        core::arch::asm!(
            "mrs {tmp}, CONTROL",
            "bics {tmp}, {spsel}",
            "msr CONTROL, {tmp}",
            "isb",
            "msr MSP, {msp}",
            "mov lr, {new_lr}",
            "bx {rv}",
            // `out(reg) _` is not permitted in a `noreturn` asm! call,
            // so instead use `in(reg) 0` and don't restore it afterwards.
            tmp = in(reg) 0,
            spsel = in(reg) 2,
            new_lr = in(reg) 0xFFFFFFFFu32,
            msp = in(reg) msp,
            rv = in(reg) rv,
            options(noreturn),
        );
    })
}
