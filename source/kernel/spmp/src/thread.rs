// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-thread SPMP shadow copies (S-mode stack guard, U-mode view)
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (guard placement, U-mode preparation); engine tests cover writes
//! PUBLIC API: StackLayout, KernelThread, ThreadContext, PrepareError
//! DEPENDS_ON: slots (encoder), global::GlobalTable (seeding), domain::MemoryDomain
//! INVARIANTS: Thread entries start at the global end index; umode.len() == 0 means the
//!             U-mode copy is unprepared; domain_offset <= umode.len() once prepared
//!
//! The S-mode copy is finalized once at thread creation. The U-mode copy is
//! built lazily before the first drop to user mode and refreshed whenever the
//! thread's memory domain changes version.

use core::fmt;

use crate::config::Config;
use crate::domain::MemoryDomain;
use crate::global::GlobalTable;
use crate::slots::{is_within, EncodeError, SlotArray, SpmpPerm};

/// Stack geometry of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackLayout {
    /// Lowest usable stack address.
    pub start: usize,
    pub size: usize,
    /// Bytes at the top of the stack reserved for TLS and startup data.
    pub delta: usize,
    /// Reserved area below `start` on kernel-only stacks (holds the guard).
    pub kernel_reserved: usize,
    /// Reserved area below `start` on user-capable stacks.
    pub user_reserved: usize,
}

impl StackLayout {
    #[inline]
    pub const fn contains(&self, start: usize, size: usize) -> bool {
        is_within(start, size, self.start, self.size)
    }
}

/// Failures while preparing a thread's shadow copies.
#[must_use = "thread creation must fail on prepare errors"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareError {
    /// `init_global` has not run on this core yet.
    GlobalNotReady,
    Encode(EncodeError),
}

impl From<EncodeError> for PrepareError {
    fn from(err: EncodeError) -> Self {
        PrepareError::Encode(err)
    }
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareError::GlobalNotReady => f.write_str("global SPMP table not initialised"),
            PrepareError::Encode(err) => write!(f, "{}", err),
        }
    }
}

/// Protection state owned by one thread.
#[derive(Clone, Debug)]
pub struct ThreadContext {
    pub(crate) smode: SlotArray,
    pub(crate) umode: SlotArray,
    pub(crate) domain_offset: usize,
    pub(crate) domain_update_nr: u64,
}

impl ThreadContext {
    pub const fn new(slots: usize) -> Self {
        Self {
            smode: SlotArray::with_capacity(slots),
            umode: SlotArray::with_capacity(slots),
            domain_offset: 0,
            domain_update_nr: 0,
        }
    }

    #[inline]
    pub fn smode(&self) -> &SlotArray {
        &self.smode
    }

    #[inline]
    pub fn umode(&self) -> &SlotArray {
        &self.umode
    }

    /// Index of the first domain partition slot in the U-mode copy.
    #[inline]
    pub const fn domain_offset(&self) -> usize {
        self.domain_offset
    }

    /// Domain version the U-mode copy was last synchronised with.
    #[inline]
    pub const fn domain_update_nr(&self) -> u64 {
        self.domain_update_nr
    }

    #[inline]
    pub const fn is_usermode_prepared(&self) -> bool {
        !self.umode.is_empty()
    }

    pub(crate) fn prepare_stack_guard(
        &mut self,
        config: &Config,
        table: &GlobalTable,
        bottom: usize,
    ) -> Result<(), PrepareError> {
        table.seed(&mut self.smode);
        let result =
            self.smode.append(config.modes, SpmpPerm::empty(), bottom, config.stack_guard_size);
        if let Err(err) = result {
            self.smode.truncate(table.end_index);
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn init_usermode(&mut self) {
        self.umode.truncate(0);
        self.domain_offset = 0;
        self.domain_update_nr = 0;
    }

    pub(crate) fn prepare_usermode(
        &mut self,
        config: &Config,
        table: &GlobalTable,
        stack: &StackLayout,
    ) -> Result<(), PrepareError> {
        table.seed(&mut self.umode);
        let mut result =
            self.umode.append(config.modes, SpmpPerm::R | SpmpPerm::W, stack.start, stack.size);
        if let (Ok(()), Some(region)) = (result, config.user_placeholder) {
            result = self.umode.append_region(config.modes, &region);
        }
        if let Err(err) = result {
            self.init_usermode();
            return Err(err.into());
        }
        self.domain_offset = self.umode.len();
        self.domain_update_nr = 0;
        Ok(())
    }
}

/// The slice of a kernel thread record the SPMP engine works on.
#[derive(Debug)]
pub struct KernelThread<'d> {
    pub stack: StackLayout,
    /// Privileged stack of a user thread, 0 when it has none.
    pub priv_stack_start: usize,
    /// The stack object can be handed to user mode.
    pub user_capable: bool,
    /// The thread was started with the user option.
    pub user: bool,
    pub domain: Option<&'d MemoryDomain>,
    pub spmp: ThreadContext,
}

impl<'d> KernelThread<'d> {
    pub const fn new(stack: StackLayout, slots: usize) -> Self {
        Self {
            stack,
            priv_stack_start: 0,
            user_capable: false,
            user: false,
            domain: None,
            spmp: ThreadContext::new(slots),
        }
    }

    /// Bottom of the privileged stack, where the no-access guard lives.
    pub fn stack_guard_bottom(&self, config: &Config) -> usize {
        if config.userspace {
            if self.priv_stack_start != 0 {
                return self.priv_stack_start;
            }
            if self.user_capable {
                return self.stack.start.wrapping_sub(self.stack.user_reserved);
            }
        }
        self.stack.start.wrapping_sub(self.stack.kernel_reserved)
    }
}
