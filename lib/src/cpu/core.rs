//! Primitive CPU instructions: hlt, pause, halt loop.

use ::core::arch::asm;

#[inline(always)]
pub fn hlt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

#[inline(always)]
pub fn pause() {
    unsafe {
        asm!("pause", options(nomem, nostack, preserves_flags));
    }
}

/// Halt forever with interrupts masked.
#[inline(always)]
pub fn halt_loop() -> ! {
    loop {
        super::interrupts::disable_interrupts();
        hlt();
    }
}
