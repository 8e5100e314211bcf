// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host test doubles: a slot writer that records every hardware write and a
//! fatal handler that turns escalation into a panic carrying the reason.

use core::ops::Range;

use crate::config::{BootLayout, Config};
use crate::fault::{FatalHandler, FatalReason, TrapFrame};
use crate::hw::SlotWriter;
use crate::slots::SlotArray;
use crate::types::MAX_CPUS;

#[derive(Clone, Debug)]
pub struct RecordedWrite {
    pub range: Range<usize>,
    pub slots: SlotArray,
}

#[derive(Default)]
pub struct RecordingSlots {
    writes: spin::Mutex<Vec<RecordedWrite>>,
    cleared: spin::Mutex<Vec<Range<usize>>>,
}

impl RecordingSlots {
    pub const fn new() -> Self {
        Self { writes: spin::Mutex::new(Vec::new()), cleared: spin::Mutex::new(Vec::new()) }
    }

    /// Cfg register ranges zeroed since the last `clear`.
    pub fn cleared(&self) -> Vec<Range<usize>> {
        self.cleared.lock().clone()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn last(&self) -> Option<RecordedWrite> {
        self.writes.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
        self.cleared.lock().clear();
    }
}

impl SlotWriter for RecordingSlots {
    fn write_slots(&self, range: Range<usize>, slots: &SlotArray) {
        self.writes.lock().push(RecordedWrite { range, slots: slots.clone() });
    }

    fn clear_cfg(&self, regs: Range<usize>) {
        self.cleared.lock().push(regs);
    }
}

/// Panics with `fatal: <reason>` so tests can match on the escalated reason.
pub struct PanicFatal;

impl FatalHandler for PanicFatal {
    fn escalate(&self, reason: FatalReason, frame: &TrapFrame) -> ! {
        panic!("fatal: {:?} sepc={:#x}", reason, frame.sepc);
    }
}

pub const ROM_START: usize = 0x8000_0000;
pub const ROM_SIZE: usize = 0x2_0000;
pub const RAM_START: usize = 0x8002_0000;
pub const RAM_SIZE: usize = 0x6_0000;
pub const IRQ_STACK: usize = 0x8004_0000;
pub const MAIN_STACK: usize = 0x8005_0000;

/// Layout in the style of the `virt` machine: 128 KiB ROM then kernel RAM.
pub fn layout() -> BootLayout {
    let mut irq_stacks = [0; MAX_CPUS];
    for (cpu, stack) in irq_stacks.iter_mut().enumerate() {
        *stack = IRQ_STACK + cpu * 0x2000;
    }
    BootLayout {
        rom_start: ROM_START,
        rom_size: ROM_SIZE,
        ram_start: RAM_START,
        ram_size: RAM_SIZE,
        irq_stacks,
        main_stack: MAIN_STACK,
    }
}

/// Full-featured configuration independent of the enabled Cargo features.
pub fn config() -> Config {
    let mut config = Config::from_features();
    config.stack_guard = true;
    config.stack_guard_size = 0x40;
    config.userspace = true;
    config.null_guard = Some(0x10);
    config.smp = false;
    config.multithreading = true;
    config.qemu_workaround = false;
    config.pow2_alignment = false;
    config.user_placeholder = None;
    config.modes = crate::slots::AddressModes::all();
    config.exhaustion_policy = crate::config::ExhaustionPolicy::DenyPartition;
    config
}
