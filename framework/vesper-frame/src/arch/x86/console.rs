// SPDX-License-Identifier: MPL-2.0

//! The early serial console (16550 UART at the legacy COM1 port).

use core::sync::atomic::{AtomicBool, Ordering::Relaxed};

const COM1: u16 = 0x3f8;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn outb(port: u16, val: u8) {
    // SAFETY: Port output to the UART register block has no memory effects.
    unsafe { x86::io::outb(port, val) }
}

fn inb(port: u16) -> u8 {
    // SAFETY: Port input from the UART register block has no memory effects.
    unsafe { x86::io::inb(port) }
}

fn init() {
    outb(COM1 + 1, 0x00); // Disable interrupts
    outb(COM1 + 3, 0x80); // Enable DLAB
    outb(COM1, 0x03); // 38400 baud, divisor low byte
    outb(COM1 + 1, 0x00); // Divisor high byte
    outb(COM1 + 3, 0x03); // 8 bits, no parity, one stop bit
    outb(COM1 + 2, 0xc7); // Enable FIFO, clear, 14-byte threshold
    outb(COM1 + 4, 0x0b); // IRQs enabled, RTS/DSR set
}

/// Sends one byte to the early console.
pub fn send(byte: u8) {
    if !INITIALIZED.swap(true, Relaxed) {
        init();
    }
    while inb(COM1 + 5) & 0x20 == 0 {
        core::hint::spin_loop();
    }
    if byte == b'\n' {
        outb(COM1, b'\r');
        while inb(COM1 + 5) & 0x20 == 0 {
            core::hint::spin_loop();
        }
    }
    outb(COM1, byte);
}
