// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lock-free UART emission used as the default log sink.
//!
//! Fault classification may run while any other context holds a lock, so the
//! engine never goes through a mutex-guarded UART.

#![cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]

use core::fmt::{self, Write};

/// Address of the first UART on the `virt` machine.
const UART0_BASE: usize = 0x1000_0000;
const UART_TX: usize = 0x0;
const UART_LSR: usize = 0x5;
const LSR_TX_IDLE: u8 = 1 << 5;

#[inline]
fn write_raw_mmio(offset: usize, value: u8) {
    let addr = (UART0_BASE + offset) as *mut u8;
    // SAFETY: UART0 is identity-mapped MMIO on the target; polled writes only.
    unsafe {
        while core::ptr::read_volatile((UART0_BASE + UART_LSR) as *const u8) & LSR_TX_IDLE == 0 {}
        core::ptr::write_volatile(addr, value);
    }
}

pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                write_raw_mmio(UART_TX, b'\r');
            }
            write_raw_mmio(UART_TX, byte);
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}
