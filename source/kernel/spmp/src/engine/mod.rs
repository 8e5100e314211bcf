// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SPMP engine facade used by boot, scheduler, syscall and trap paths
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Integration-style unit tests against the recording writer
//! PUBLIC API: Spmp::{init_global, prepare/enable/disable_stack_guard, init/prepare/enable_usermode,
//!             domain_*, thread_join/leave_domain, max_partitions, validate_buffer, classify,
//!             on_fault, user_fault}
//! DEPENDS_ON: hw::SlotWriter, global, thread, domain, fault, validate
//! INVARIANTS: Thread writes cover [global_end, thread_end) only; the global table is
//!             published once and cross-checked by every later core; the domain lock is
//!             released before any hardware write

use spin::Once;

use crate::arch::riscv as arch;
use crate::config::{BootLayout, Config};
use crate::domain::{DomainError, MemoryDomain, Partition, PartitionId, ResyncError, ResyncReport};
use crate::fault::{self, ExceptionFixup, FatalHandler, FatalReason, FaultOutcome, TrapFrame};
use crate::global::{self, GlobalTable};
use crate::hw::{self, SlotWriter};
use crate::slots::SlotArray;
use crate::thread::{KernelThread, PrepareError};
use crate::types::CpuId;
use crate::validate;

/// SPMP engine bound to one hardware writer.
///
/// Typically a `static` shared by every hart; all methods take `&self`.
pub struct Spmp<W: SlotWriter> {
    config: Config,
    layout: BootLayout,
    hw: W,
    global: Once<GlobalTable>,
    fixups: &'static [ExceptionFixup],
}

impl<W: SlotWriter> Spmp<W> {
    pub const fn new(config: Config, layout: BootLayout, hw: W) -> Self {
        Self { config, layout, hw, global: Once::new(), fixups: &[] }
    }

    /// Adds fault fixups on top of the built-in user-memory probes.
    pub fn with_fixups(mut self, fixups: &'static [ExceptionFixup]) -> Self {
        self.fixups = fixups;
        self
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn layout(&self) -> &BootLayout {
        &self.layout
    }

    #[inline]
    pub fn hw(&self) -> &W {
        &self.hw
    }

    /// The published global table, once the boot core ran `init_global`.
    #[inline]
    pub fn global(&self) -> Option<&GlobalTable> {
        self.global.get()
    }

    fn table(&self) -> Result<&GlobalTable, PrepareError> {
        self.global.get().ok_or(PrepareError::GlobalNotReady)
    }

    // ——— boot ———

    /// Programs the global entries on `cpu`. Runs once per core during boot.
    ///
    /// Panics when the global entries cannot be encoded or when a later core
    /// derives a table different from the published one.
    pub fn init_global(&self, cpu: CpuId) -> GlobalTable {
        if let Err(err) = self.config.validate() {
            panic!("invalid SPMP configuration: {}", err);
        }
        let mut slots = global::build(&self.config, &self.layout, cpu);
        let end = slots.len();
        hw::write_range(&self.hw, &self.config, &mut slots, 0, end, true);

        if self.config.smp && self.config.stack_guard {
            // IRQ stack guards differ per CPU; never continue a TOR off them.
            slots.set_addr(end - 1, usize::MAX);
        }

        let table = global::freeze(&slots);
        let published = *self.global.call_once(|| table);
        if published != table {
            panic!(
                "cpu {} derived global SPMP table {:?}, expected {:?}",
                cpu, table, published
            );
        }
        log_info!(target: "spmp", "cpu {}: {} global SPMP entries", cpu, end);
        table
    }

    // ——— S-mode stack guard ———

    /// Builds the thread's stack guard copy. Called once at thread creation.
    pub fn prepare_stack_guard(&self, thread: &mut KernelThread<'_>) -> Result<(), PrepareError> {
        if !self.config.stack_guard {
            return Ok(());
        }
        let table = self.table()?;
        let bottom = thread.stack_guard_bottom(&self.config);
        thread.spmp.prepare_stack_guard(&self.config, table, bottom)?;
        log_debug!(target: "spmp", "stack guard at {:#x} ({} slots)", bottom, thread.spmp.smode().len());
        Ok(())
    }

    /// Writes the thread's stack guard entries. Called on every context switch.
    pub fn enable_stack_guard(&self, thread: &mut KernelThread<'_>) {
        let Some(table) = self.global.get() else {
            return;
        };
        let end = thread.spmp.smode.len();
        if end <= table.end_index {
            return;
        }
        hw::write_range(&self.hw, &self.config, &mut thread.spmp.smode, table.end_index, end, false);
    }

    /// Turns the thread's stack guard entries off in hardware.
    pub fn disable_stack_guard(&self, thread: &KernelThread<'_>) {
        let Some(table) = self.global.get() else {
            return;
        };
        let end = thread.spmp.smode.len();
        if end <= table.end_index {
            return;
        }
        let mut off = SlotArray::with_capacity(self.config.slots);
        table.seed(&mut off);
        off.set_len(end);
        hw::write_range(&self.hw, &self.config, &mut off, table.end_index, end, false);
    }

    // ——— U-mode ———

    /// Marks the thread's U-mode copy as unprepared.
    pub fn init_usermode(&self, thread: &mut KernelThread<'_>) {
        thread.spmp.init_usermode();
    }

    /// Maps the user stack (and the platform placeholder) before the first
    /// drop to user mode.
    pub fn prepare_usermode(&self, thread: &mut KernelThread<'_>) -> Result<(), PrepareError> {
        let table = self.table()?;
        let stack = thread.stack;
        thread.spmp.prepare_usermode(&self.config, table, &stack)?;
        log_debug!(
            target: "spmp",
            "usermode prepared, domain entries from slot {}",
            thread.spmp.domain_offset()
        );
        Ok(())
    }

    /// Writes the thread's U-mode entries, resynchronising with its domain
    /// first when the domain changed. Called on every switch to a user thread.
    ///
    /// Returns the resync report when a resync happened. Under
    /// `ExhaustionPolicy::TerminateThread` an exhausted resync writes nothing
    /// and the caller must terminate the thread.
    pub fn enable_usermode(
        &self,
        thread: &mut KernelThread<'_>,
    ) -> Result<Option<ResyncReport>, ResyncError> {
        if !thread.spmp.is_usermode_prepared() {
            return Ok(None);
        }
        let Some(table) = self.global.get() else {
            return Ok(None);
        };

        let ctx = &mut thread.spmp;
        let report = match thread.domain {
            Some(domain) if ctx.domain_update_nr != domain.update_nr() => {
                let report = domain.resync(ctx, self.config.modes, self.config.exhaustion_policy)?;
                if !report.is_complete() {
                    log_warn!(
                        target: "spmp",
                        "domain partially mapped: denied={:#x} too_small={:#x}",
                        report.denied,
                        report.too_small
                    );
                }
                Some(report)
            }
            Some(_) => None,
            None => {
                ctx.umode.truncate(ctx.domain_offset);
                None
            }
        };

        let end = ctx.umode.len();
        if end > table.end_index {
            hw::write_range(&self.hw, &self.config, &mut ctx.umode, table.end_index, end, true);
        }
        Ok(report)
    }

    // ——— memory domains ———

    pub fn domain_init(&self, domain: &MemoryDomain) {
        domain.init();
    }

    /// Adds a partition; every member thread resyncs before its next U-mode run.
    pub fn domain_add_partition(
        &self,
        domain: &MemoryDomain,
        partition: Partition,
    ) -> Result<PartitionId, DomainError> {
        domain.add_partition(partition, self.max_partitions())
    }

    pub fn domain_remove_partition(
        &self,
        domain: &MemoryDomain,
        id: PartitionId,
    ) -> Result<Partition, DomainError> {
        domain.remove_partition(id)
    }

    /// Moves `thread` into `domain` and forces a resync on its next U-mode run.
    pub fn thread_join_domain<'d>(&self, thread: &mut KernelThread<'d>, domain: &'d MemoryDomain) {
        thread.domain = Some(domain);
        let ctx = &mut thread.spmp;
        if ctx.is_usermode_prepared() {
            ctx.umode.truncate(ctx.domain_offset);
        }
        ctx.domain_update_nr = 0;
    }

    /// Protection state is untouched; the entries go away on the next resync.
    pub fn thread_leave_domain(&self, thread: &mut KernelThread<'_>) {
        thread.domain = None;
    }

    /// Optimistic number of partitions a domain can hold: slots left after the
    /// global entries and the user stack, assuming one slot per partition.
    pub fn max_partitions(&self) -> usize {
        let global_end = self.global.get().map_or(0, |table| table.end_index);
        self.config
            .slots
            .saturating_sub(global_end)
            .saturating_sub(self.config.user_stack_slots())
    }

    // ——— syscalls ———

    pub fn validate_buffer(
        &self,
        thread: &KernelThread<'_>,
        addr: usize,
        len: usize,
        write: bool,
    ) -> bool {
        validate::validate_buffer(&self.layout, thread, addr, len, write)
    }

    // ——— traps ———

    /// Classifies a trap. A recovered probe fault has already had `sepc`
    /// redirected to its fixup.
    pub fn classify(&self, frame: &mut TrapFrame, current: Option<&KernelThread<'_>>) -> FaultOutcome {
        if self.config.userspace && fault::apply_fixup(frame, &[self.fixups, arch::probe_fixups()]) {
            log_debug!(target: "fatal", "user memory probe fault, resuming at {:#x}", frame.sepc);
            return FaultOutcome::Recovered;
        }
        let frame_addr = frame as *const TrapFrame as usize;
        let sp = fault::sp_before_trap(frame, frame_addr, self.config.userspace);
        if fault::bad_stack_pointer(&self.config, &self.layout, current, frame, sp) {
            FaultOutcome::Fatal(FatalReason::StackCheckFail)
        } else {
            FaultOutcome::Fatal(FatalReason::CpuException)
        }
    }

    /// Trap entry for access faults. Returns only when a probe fixup applied.
    pub fn on_fault<F: FatalHandler + ?Sized>(
        &self,
        frame: &mut TrapFrame,
        current: Option<&KernelThread<'_>>,
        fatal: &F,
    ) {
        let reason = match self.classify(frame, current) {
            FaultOutcome::Recovered => return,
            FaultOutcome::Fatal(reason) => reason,
        };
        if reason == FatalReason::StackCheckFail && self.config.stack_guard {
            // Keep the guard from faulting again while the error is reported.
            if let Some(thread) = current {
                self.disable_stack_guard(thread);
            }
        }
        log_error!(target: "fatal", "scause: {:#x}, {}", frame.scause, fault::describe_cause(frame.scause));
        log_error!(target: "fatal", "  stval: {:#x}", frame.stval);
        log_error!(target: "fatal", "   sepc: {:#x} ra: {:#x} sp: {:#x}", frame.sepc, frame.x[1], frame.x[2]);
        log_error!(target: "fatal", "sstatus: {:#x}", frame.sstatus);
        fatal.escalate(reason, frame)
    }

    /// Fault raised on behalf of `thread` (syscall oops or explicit request).
    pub fn user_fault<F: FatalHandler + ?Sized>(
        &self,
        thread: &KernelThread<'_>,
        reason: FatalReason,
        frame: &TrapFrame,
        fatal: &F,
    ) -> ! {
        fatal.escalate(fault::user_fault_reason(reason, thread.user), frame)
    }
}
