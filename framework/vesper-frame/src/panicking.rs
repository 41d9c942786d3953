// SPDX-License-Identifier: MPL-2.0

//! Panic support for the bare-metal target.

use core::panic::PanicInfo;

use log::error;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    crate::arch::irq::disable_local();
    error!("kernel panic: {}", info);
    loop {
        x86_64::instructions::hlt();
    }
}
