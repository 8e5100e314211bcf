// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Trap classification for SPMP faults
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (fixups, guard matching, user stack bounds, reason mapping)
//! PUBLIC API: TrapFrame, FatalReason, FatalHandler, ExceptionFixup, FaultOutcome,
//!             describe_cause(), sp_before_trap(), user_fault_reason()
//! DEPENDS_ON: config (Config, BootLayout), thread::KernelThread
//! INVARIANTS: Probe fixups are checked before anything else; classification is lock-free
//!             so it can run from interrupt context

use core::fmt;

use crate::arch::riscv::SSTATUS_SPP;
use crate::config::{BootLayout, Config};
use crate::thread::KernelThread;
use crate::types::CpuId;

/// Register state saved by the trap prologue.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct TrapFrame {
    /// x0..x31 (x0 is always 0; we never write it).
    pub x: [usize; 32],
    pub sepc: usize,
    pub sstatus: usize,
    pub scause: usize,
    pub stval: usize,
}

impl TrapFrame {
    /// Stack pointer register (x2) as saved at trap entry.
    #[inline]
    pub const fn sp(&self) -> usize {
        self.x[2]
    }

    /// The trap was taken from U-mode.
    #[inline]
    pub const fn from_user(&self) -> bool {
        self.sstatus & SSTATUS_SPP == 0
    }
}

const INTERRUPT_FLAG: usize = usize::MAX - (usize::MAX >> 1);

pub fn describe_cause(scause: usize) -> &'static str {
    let code = scause & (usize::MAX >> 1);
    if scause & INTERRUPT_FLAG != 0 {
        match code {
            1 => "SupervisorSoftInt",
            5 => "SupervisorTimerInt",
            9 => "SupervisorExternalInt",
            _ => "Interrupt",
        }
    } else {
        match code {
            0 => "InstructionAddressMisaligned",
            1 => "InstructionAccessFault",
            2 => "IllegalInstruction",
            3 => "Breakpoint",
            4 => "LoadAddressMisaligned",
            5 => "LoadAccessFault",
            6 => "StoreAMOAddressMisaligned",
            7 => "StoreAMOAccessFault",
            8 => "EnvironmentCallFromUMode",
            9 => "EnvironmentCallFromSMode",
            12 => "InstructionPageFault",
            13 => "LoadPageFault",
            15 => "StoreAMOPageFault",
            _ => "Exception",
        }
    }
}

/// Reason codes handed to the fatal error path.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalReason {
    CpuException = 0,
    SpuriousIrq = 1,
    StackCheckFail = 2,
    KernelOops = 3,
    KernelPanic = 4,
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FatalReason::CpuException => "CPU exception",
            FatalReason::SpuriousIrq => "spurious interrupt",
            FatalReason::StackCheckFail => "stack check failure",
            FatalReason::KernelOops => "kernel oops",
            FatalReason::KernelPanic => "kernel panic",
        };
        f.write_str(name)
    }
}

/// Fatal error escalation; never returns.
pub trait FatalHandler {
    fn escalate(&self, reason: FatalReason, frame: &TrapFrame) -> !;
}

/// Shuts the machine down through SBI with a system-failure reason.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct SbiShutdown;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
impl FatalHandler for SbiShutdown {
    fn escalate(&self, reason: FatalReason, frame: &TrapFrame) -> ! {
        log_error!(target: "fatal", "{} at sepc={:#x}, shutting down", reason, frame.sepc);
        let _ = sbi_rt::system_reset(sbi_rt::Shutdown, sbi_rt::SystemFailure);
        loop {
            core::hint::spin_loop();
        }
    }
}

/// A PC range whose faults resume at `fixup` instead of being fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionFixup {
    pub start: usize,
    pub end: usize,
    pub fixup: usize,
}

impl ExceptionFixup {
    #[inline]
    pub const fn covers(&self, pc: usize) -> bool {
        pc >= self.start && pc < self.end
    }
}

/// A user-memory probe hit unreadable memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeFault;

impl fmt::Display for ProbeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("user memory not accessible")
    }
}

/// Classification result of a trap.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// A probe fixup rewrote `sepc`; return from the trap.
    Recovered,
    Fatal(FatalReason),
}

/// Rewrites `sepc` when the faulting PC lies inside a probe routine.
pub fn apply_fixup(frame: &mut TrapFrame, tables: &[&[ExceptionFixup]]) -> bool {
    let pc = frame.sepc;
    let hit = tables.iter().flat_map(|table| table.iter()).find(|entry| entry.covers(pc));
    match hit {
        Some(entry) => {
            frame.sepc = entry.fixup;
            true
        }
        None => false,
    }
}

/// Stack pointer right before the trap: just above the saved frame, or the
/// saved user stack pointer when the trap came from U-mode.
pub fn sp_before_trap(frame: &TrapFrame, frame_addr: usize, userspace: bool) -> usize {
    if userspace && frame.from_user() {
        frame.sp()
    } else {
        frame_addr.wrapping_add(core::mem::size_of::<TrapFrame>())
    }
}

#[inline]
fn in_guard(sp: usize, bottom: usize, size: usize) -> bool {
    sp >= bottom && sp - bottom < size
}

/// Whether `sp` shows a stack overflow (or an escaped user stack pointer).
pub fn bad_stack_pointer(
    config: &Config,
    layout: &BootLayout,
    current: Option<&KernelThread<'_>>,
    frame: &TrapFrame,
    sp: usize,
) -> bool {
    let guard = config.stack_guard_size;
    if config.stack_guard {
        if let Some(thread) = current {
            if config.userspace {
                if thread.priv_stack_start != 0 && in_guard(sp, thread.priv_stack_start, guard) {
                    return true;
                }
                let reserved = thread.stack.start.wrapping_sub(thread.stack.user_reserved);
                if thread.user_capable && in_guard(sp, reserved, guard) {
                    return true;
                }
            }
            if config.multithreading {
                let reserved = thread.stack.start.wrapping_sub(thread.stack.kernel_reserved);
                if in_guard(sp, reserved, guard) {
                    return true;
                }
            }
        }
        if !config.multithreading {
            let irq_stack = layout.irq_stacks[CpuId::BOOT.as_index()];
            if in_guard(sp, irq_stack, guard) || in_guard(sp, layout.main_stack, guard) {
                return true;
            }
        }
    }

    if config.userspace && frame.from_user() {
        if let Some(thread) = current {
            let stack = &thread.stack;
            let top = stack.start.wrapping_add(stack.size).wrapping_sub(stack.delta);
            if frame.sp() < stack.start || frame.sp() > top {
                return true;
            }
        }
    }
    false
}

/// Reason escalated for a fault requested by a thread: user threads may only
/// raise a stack check failure, anything else becomes a kernel oops.
#[inline]
pub const fn user_fault_reason(reason: FatalReason, is_user: bool) -> FatalReason {
    match reason {
        FatalReason::StackCheckFail => reason,
        _ if is_user => FatalReason::KernelOops,
        _ => reason,
    }
}
