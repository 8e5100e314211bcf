// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared across the SPMP engine
//! OWNERS: @kernel-team
//! PUBLIC API: CpuId, MAX_CPUS
//! INVARIANTS: CPU ids are bounded by MAX_CPUS before indexing per-CPU tables

use core::fmt;

/// Fixed CPU ceiling for bounded per-CPU state.
pub const MAX_CPUS: usize = 4;

/// Logical CPU identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    pub const BOOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}
