// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SPMP register writer and the hardware write primitive
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests against the recording writer
//! PUBLIC API: SlotWriter, CsrSlots, write_range(), last_write_cycles()
//! DEPENDS_ON: arch::riscv (CSR access, cycle counter), slots::SlotArray
//! INVARIANTS: start < end <= capacity <= configured slots, checked before any write;
//!             a write never touches slots outside [start, end) except the QEMU zero pass;
//!             a trailing-clear write leaves no cfg register above `end` programmed

use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::riscv as arch;
use crate::config::Config;
use crate::slots::{SlotArray, CFG_STRIDE};

/// Platform primitive performing the privileged register writes for a slot range.
///
/// Implementations write the address registers of `range`, every cfg register
/// overlapping `range`, and the switch register. The write is synchronous and
/// atomic with respect to the calling core.
pub trait SlotWriter {
    fn write_slots(&self, range: Range<usize>, slots: &SlotArray);

    /// Zeroes the cfg registers `regs`.
    fn clear_cfg(&self, regs: Range<usize>);
}

/// Writes slots straight into the SPMP CSRs of the current hart.
#[derive(Clone, Copy, Debug, Default)]
pub struct CsrSlots;

impl SlotWriter for CsrSlots {
    fn write_slots(&self, range: Range<usize>, slots: &SlotArray) {
        let first_reg = range.start / CFG_STRIDE;
        let last_reg = range.end.div_ceil(CFG_STRIDE);
        for index in range {
            arch::write_spmpaddr(index, slots.addr(index));
        }
        for reg in first_reg..last_reg {
            arch::write_spmpcfg(reg, slots.cfg_word(reg));
        }
        arch::write_spmpswitch(slots.switch_mask());
    }

    fn clear_cfg(&self, regs: Range<usize>) {
        for reg in regs {
            arch::write_spmpcfg(reg, 0);
        }
    }
}

static WRITE_START: AtomicU64 = AtomicU64::new(0);
static WRITE_END: AtomicU64 = AtomicU64::new(0);

/// Cycle counter values sampled around the most recent slot write.
pub fn last_write_cycles() -> (u64, u64) {
    (WRITE_START.load(Ordering::Relaxed), WRITE_END.load(Ordering::Relaxed))
}

/// Writes slots `[start, end)` of `slots` to hardware.
///
/// Panics when the range is empty, exceeds the array, or the array is larger
/// than the configured hardware. With `clear_trailing`, cfg bytes and enable
/// bits from `end` up to the next cfg register boundary are zeroed first, and
/// every cfg register above that boundary is cleared in hardware, so entries
/// left by a larger copy cannot stay active.
pub fn write_range<W: SlotWriter + ?Sized>(
    hw: &W,
    config: &Config,
    slots: &mut SlotArray,
    start: usize,
    end: usize,
    clear_trailing: bool,
) {
    if !(start < end && end <= slots.capacity() && slots.capacity() <= config.slots) {
        panic!(
            "bad SPMP range (start={} end={} capacity={} slots={})",
            start,
            end,
            slots.capacity(),
            config.slots
        );
    }

    if clear_trailing {
        slots.clear_trailing(end);
    }

    if config.qemu_workaround {
        // QEMU may report false access faults on transient mixed entries.
        hw.write_slots(start..config.slots, &SlotArray::EMPTY);
    }

    WRITE_START.store(arch::read_cycles(), Ordering::Relaxed);
    hw.write_slots(start..end, slots);
    if clear_trailing {
        let first_unused = end.div_ceil(CFG_STRIDE);
        let regs = config.slots / CFG_STRIDE;
        if first_unused < regs {
            hw.clear_cfg(first_unused..regs);
        }
    }
    WRITE_END.store(arch::read_cycles(), Ordering::Relaxed);
    log_trace!(target: "spmp", "wrote slots {}..{} switch={:#x}", start, end, slots.switch_mask());
}
