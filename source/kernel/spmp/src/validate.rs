// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User buffer checks for privileged code
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (own stack, ROM reads, partition order, wrapping ranges)
//! PUBLIC API: validate_buffer(), user_string_nlen()
//! DEPENDS_ON: thread::KernelThread, domain::MemoryDomain, arch::riscv (string probe)
//! INVARIANTS: Containment checks never overflow; the domain lock is held for the
//!             partition scan only
//!
//! A buffer is accepted when it lies inside the caller's own stack, inside the
//! read-only region for reads, or inside the first domain partition that
//! contains it, provided that partition grants the access.

use crate::arch::riscv as arch;
use crate::config::BootLayout;
use crate::fault::ProbeFault;
use crate::slots::SpmpPerm;
use crate::thread::KernelThread;

pub fn validate_buffer(
    layout: &BootLayout,
    thread: &KernelThread<'_>,
    addr: usize,
    len: usize,
    write: bool,
) -> bool {
    if thread.stack.contains(addr, len) {
        return true;
    }
    if !write && layout.in_rom(addr, len) {
        return true;
    }
    let Some(domain) = thread.domain else {
        return false;
    };
    // The first containing partition decides, even if a later one would grant.
    match domain.find_containing(addr, len) {
        Some(part) => part.perm.contains(if write { SpmpPerm::W } else { SpmpPerm::R }),
        None => false,
    }
}

/// Length of a user string, bounded by `max`, without faulting the kernel.
///
/// # Safety
///
/// See [`arch::riscv::user_string_nlen`](crate::arch::riscv::user_string_nlen).
pub unsafe fn user_string_nlen(s: *const u8, max: usize) -> Result<usize, ProbeFault> {
    arch::user_string_nlen(s, max)
}
