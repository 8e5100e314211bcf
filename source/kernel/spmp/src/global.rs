// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time global SPMP region table
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (entry order, SMP cross-check, thread seeding)
//! PUBLIC API: GlobalTable (seed), build()
//! DEPENDS_ON: slots (encoder), config (Config, BootLayout)
//! INVARIANTS: Global entries occupy slots [0, end_index) and fit in spmpcfg0;
//!             every core derives an identical table; immutable once published

use crate::config::{BootLayout, Config};
use crate::slots::{SlotArray, SpmpPerm, CFG_STRIDE};
use crate::types::{CpuId, MAX_CPUS};

/// Frozen result of the boot-time global allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalTable {
    /// spmpcfg0 holding the global config bytes (zero above `end_index`).
    pub cfg_word: usize,
    /// Enable bits of the global entries.
    pub switch: u64,
    /// Address field of the last global slot, used for TOR continuation.
    pub last_addr: usize,
    /// First slot available to threads.
    pub end_index: usize,
}

impl GlobalTable {
    /// Seeds a thread copy with the global entries so thread slots can be
    /// appended after them and cfg register 0 is written back intact.
    pub fn seed(&self, slots: &mut SlotArray) {
        slots.truncate(0);
        slots.set_cfg_word(0, self.cfg_word);
        slots.set_switch_mask(self.switch);
        slots.set_addr(self.end_index - 1, self.last_addr);
        slots.set_len(self.end_index);
    }
}

/// Encodes the global entries for `cpu`: ROM, kernel RAM, the optional null
/// guard and the optional IRQ stack guard, in that order.
///
/// Any encoding failure is a fatal configuration bug.
pub fn build(config: &Config, layout: &BootLayout, cpu: CpuId) -> SlotArray {
    let mut slots = SlotArray::with_capacity(config.slots);
    let modes = config.modes;

    if let Err(err) = slots.append(
        modes,
        SpmpPerm::S | SpmpPerm::W | SpmpPerm::X,
        layout.rom_start,
        layout.rom_size,
    ) {
        panic!("global SPMP entry for ROM failed: {}", err);
    }
    if let Err(err) =
        slots.append(modes, SpmpPerm::W | SpmpPerm::X, layout.ram_start, layout.ram_size)
    {
        panic!("global SPMP entry for kernel RAM failed: {}", err);
    }
    if let Some(size) = config.null_guard {
        if let Err(err) = slots.append(modes, SpmpPerm::empty(), 0, size) {
            panic!("global SPMP null guard failed: {}", err);
        }
    }
    if config.stack_guard {
        if cpu.as_index() >= MAX_CPUS {
            panic!("cpu {} exceeds MAX_CPUS", cpu);
        }
        let bottom = layout.irq_stacks[cpu.as_index()];
        if let Err(err) = slots.append(modes, SpmpPerm::empty(), bottom, config.stack_guard_size) {
            panic!("global SPMP IRQ stack guard for cpu {} failed: {}", cpu, err);
        }
    }

    if slots.len() > CFG_STRIDE {
        panic!("global SPMP entries ({}) overflow spmpcfg0", slots.len());
    }
    slots
}

/// Captures the table from a freshly written global array.
pub(crate) fn freeze(slots: &SlotArray) -> GlobalTable {
    let end_index = slots.len();
    GlobalTable {
        cfg_word: slots.cfg_word(0),
        switch: slots.switch_mask(),
        last_addr: slots.addr(end_index - 1),
        end_index,
    }
}
