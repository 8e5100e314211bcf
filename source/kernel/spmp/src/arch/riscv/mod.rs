// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V specific helpers used by the SPMP engine.
//!
//! SPMP registers can only be named by an immediate CSR number, so slot
//! indices are dispatched through a match over every supported slot. Host
//! builds get inert stubs so the engine logic can be exercised by unit tests.

#![cfg_attr(not(all(target_arch = "riscv64", target_os = "none")), allow(dead_code))]

use crate::fault::{ExceptionFixup, ProbeFault};

/// `sstatus.SPP`: previous privilege was supervisor.
pub const SSTATUS_SPP: usize = 1 << 8;

/// First spmpcfg CSR; register `k` lives at `SPMPCFG_BASE + 2k` on RV64.
pub const SPMPCFG_BASE: usize = 0x500;
/// First spmpaddr CSR.
pub const SPMPADDR_BASE: usize = 0x510;
/// spmpswitch CSR (entry enable mask).
pub const SPMPSWITCH: usize = 0x550;

/// Reads the cycle counter.
#[inline]
pub fn read_cycles() -> u64 {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        riscv::register::cycle::read() as u64
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
macro_rules! csrw_indexed {
    ($base:expr, $stride:expr, $index:expr, $value:expr; $($n:literal)*) => {
        match $index {
            $(
                $n => unsafe {
                    core::arch::asm!(
                        "csrw {csr}, {v}",
                        csr = const $base + $stride * $n,
                        v = in(reg) $value,
                        options(nostack)
                    )
                },
            )*
            _ => panic!("SPMP CSR index {} out of range", $index),
        }
    };
}

/// Writes spmpaddr`index`.
#[inline]
pub fn write_spmpaddr(index: usize, value: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    csrw_indexed!(SPMPADDR_BASE, 1, index, value;
        0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
        16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
        32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47
        48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63);
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = (index, value);
    }
}

/// Writes the `reg`-th spmpcfg register (even CSR numbers on RV64).
#[inline]
pub fn write_spmpcfg(reg: usize, value: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    csrw_indexed!(SPMPCFG_BASE, 2, reg, value; 0 1 2 3 4 5 6 7);
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = (reg, value);
    }
}

/// Writes the entry enable mask.
#[inline]
pub fn write_spmpswitch(value: u64) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "csrw {csr}, {v}",
            csr = const SPMPSWITCH,
            v = in(reg) value,
            options(nostack)
        );
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let _ = value;
    }
}

// ——— user string probe ———
//
// Only the load may fault. The fixup lands after the store that clears `*err`,
// so a faulting probe returns with `*err == -1`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    ".section .text.spmp_user_string_nlen, \"ax\"",
    ".globl __spmp_user_string_nlen",
    ".globl __spmp_usn_fault_start",
    ".globl __spmp_usn_fault_end",
    ".globl __spmp_usn_fixup",
    "__spmp_user_string_nlen:",
    "    li   a5, 0",
    "    li   a3, -1",
    "    sw   a3, 0(a2)",
    "1:  beq  a5, a1, 2f",
    "    add  a4, a0, a5",
    "__spmp_usn_fault_start:",
    "    lbu  a4, 0(a4)",
    "__spmp_usn_fault_end:",
    "    beqz a4, 2f",
    "    addi a5, a5, 1",
    "    j    1b",
    "2:  sw   zero, 0(a2)",
    "__spmp_usn_fixup:",
    "    mv   a0, a5",
    "    ret",
    ".previous",
);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
extern "C" {
    fn __spmp_user_string_nlen(s: *const u8, max: usize, err: *mut i32) -> usize;
    static __spmp_usn_fault_start: u8;
    static __spmp_usn_fault_end: u8;
    static __spmp_usn_fixup: u8;
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
static PROBE_FIXUPS: spin::Once<[ExceptionFixup; 1]> = spin::Once::new();

/// Fixup table covering the user-memory probe routines.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn probe_fixups() -> &'static [ExceptionFixup] {
    PROBE_FIXUPS.call_once(|| {
        // SAFETY: only the addresses of the linker symbols are taken.
        unsafe {
            [ExceptionFixup {
                start: core::ptr::addr_of!(__spmp_usn_fault_start) as usize,
                end: core::ptr::addr_of!(__spmp_usn_fault_end) as usize,
                fixup: core::ptr::addr_of!(__spmp_usn_fixup) as usize,
            }]
        }
    })
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn probe_fixups() -> &'static [ExceptionFixup] {
    &[]
}

/// Length of the NUL-terminated string at `s`, at most `max` bytes.
///
/// # Safety
///
/// On the kernel target an unreadable byte is reported as `ProbeFault` through
/// the fault fixup table, which must be consulted by the trap handler. On the
/// host the caller must guarantee `[s, s + max)` is readable.
pub unsafe fn user_string_nlen(s: *const u8, max: usize) -> Result<usize, ProbeFault> {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let mut err: i32 = 0;
        let len = __spmp_user_string_nlen(s, max, &mut err);
        if err != 0 {
            Err(ProbeFault)
        } else {
            Ok(len)
        }
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        let mut len = 0;
        while len < max && *s.add(len) != 0 {
            len += 1;
        }
        Ok(len)
    }
}
