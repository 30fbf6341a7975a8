//! Loading into SRAM and the jump into the loaded image.

use core::sync::atomic::Ordering;

use cortex_m::peripheral::{NVIC, SCB, SYST};
use secure_boot::loader::{Handoff, TargetMemory};

use super::protection::THREAD_UNPRIVILEGED;

/// `CONTROL.nPRIV`.
const CONTROL_NPRIV: u32 = 1 << 0;
/// `CONTROL.SPSEL`.
const CONTROL_SPSEL: u32 = 1 << 1;

/// Secure code and data SRAM.
pub struct Sram;

impl TargetMemory for Sram {
    fn copy_to(&mut self, destination: u32, bytes: &[u8]) {
        // SAFETY:
        // The loader only copies into validated ranges of SRAM that the boot core does not use.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                destination as usize as *mut u8,
                bytes.len(),
            )
        }
        cortex_m::asm::dsb();
    }
}

/// Jumps into an image whose entry address is its vector table.
pub struct Jump;

impl Handoff for Jump {
    fn prepare(&mut self) {
        cortex_m::interrupt::disable();

        // SAFETY:
        // Interrupts are disabled and nothing else accesses the NVIC during the handoff.
        let nvic = unsafe { &*NVIC::PTR };
        for clear_enable in &nvic.icer {
            // SAFETY:
            // Disabling interrupts has no memory safety implications.
            unsafe { clear_enable.write(u32::MAX) }
        }
        for clear_pending in &nvic.icpr {
            // SAFETY:
            // Clearing pending interrupts has no memory safety implications.
            unsafe { clear_pending.write(u32::MAX) }
        }
        for priority in &nvic.ipr {
            // SAFETY:
            // Interrupt priorities are reset to their reset value.
            unsafe { priority.write(0) }
        }

        // SAFETY:
        // Nothing else accesses SysTick during the handoff.
        let syst = unsafe { &*SYST::PTR };
        // SAFETY:
        // Stopping SysTick has no memory safety implications.
        unsafe { syst.csr.write(0) }
    }

    unsafe fn transfer(&mut self, entry: u32) {
        let vector_table = entry as usize as *const u32;
        // SAFETY:
        // The caller guarantees that `entry` is the address of a loaded vector table.
        let stack_pointer = unsafe { core::ptr::read_volatile(vector_table) };
        // SAFETY:
        // The caller guarantees that `entry` is the address of a loaded vector table.
        let reset_vector = unsafe { core::ptr::read_volatile(vector_table.wrapping_add(1)) };

        log::trace!("msp={stack_pointer:#010X} reset={reset_vector:#010X}");

        // SAFETY:
        // Nothing else accesses the SCB during the handoff.
        let scb = unsafe { &*SCB::PTR };
        // SAFETY:
        // The new vector table is fully loaded and interrupts are disabled.
        unsafe { scb.vtor.write(entry) }

        let mut control = cortex_m::register::control::read().bits() & !CONTROL_SPSEL;
        if THREAD_UNPRIVILEGED.load(Ordering::Acquire) {
            control |= CONTROL_NPRIV;
        }

        cortex_m::asm::dmb();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        // SAFETY:
        // The NVIC has been cleared, so no stale interrupt fires on the boot core's stack.
        unsafe { cortex_m::interrupt::enable() }

        // SAFETY:
        // The main stack pointer is switched before privilege is dropped, and control never
        // returns to the boot core.
        unsafe {
            core::arch::asm!(
                "msr msp, {stack_pointer}",
                "msr control, {control}",
                "isb",
                "bx {reset_vector}",
                stack_pointer = in(reg) stack_pointer,
                control = in(reg) control,
                reset_vector = in(reg) reset_vector,
                options(noreturn),
            )
        }
    }
}
