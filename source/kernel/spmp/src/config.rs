// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Build-time SPMP configuration and the boot memory layout
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests (feature defaults, validation)
//! PUBLIC API: Config (from_features/validate), ExhaustionPolicy, BootLayout, ConfigError
//! DEPENDS_ON: slots (AddressModes, MemoryRegion)
//! INVARIANTS: slots is a non-zero multiple of CFG_STRIDE and <= MAX_SLOTS; at least one
//!             addressing mode; guard sizes are 4-byte aligned (power of two when the
//!             hardware needs aligned regions)
//!
//! Cargo features pick the compiled defaults; `Config` carries them at runtime
//! so host tests can exercise every combination without rebuilding.

use core::fmt;

use crate::slots::{AddressModes, MemoryRegion, SpmpPerm, CFG_STRIDE, MAX_SLOTS, MIN_REGION};
use crate::types::MAX_CPUS;

/// Size of the no-access region placed at the bottom of every privileged stack.
pub const DEFAULT_STACK_GUARD_SIZE: usize = 1024;

/// Size of the zero-page guard.
pub const DEFAULT_NULL_GUARD_SIZE: usize = 0x10;

/// Platform placeholder region mapped into every U-mode copy.
pub const USER_PLACEHOLDER: MemoryRegion =
    MemoryRegion::new(0xDEAD_0000, 0xBEE0, SpmpPerm::R.union(SpmpPerm::W));

/// What a domain resync does when a partition no longer fits in the thread's slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Log, leave the partition unmapped and keep going.
    DenyPartition,
    /// Abort the resync so the caller terminates the offending thread.
    TerminateThread,
}

/// Runtime view of the SPMP build configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Hardware slot count.
    pub slots: usize,
    pub modes: AddressModes,
    pub stack_guard: bool,
    pub stack_guard_size: usize,
    pub userspace: bool,
    /// Size of the zero-page guard, when enabled.
    pub null_guard: Option<usize>,
    pub smp: bool,
    /// A scheduler exists; false selects the static IRQ/main stack guards.
    pub multithreading: bool,
    pub qemu_workaround: bool,
    pub pow2_alignment: bool,
    pub user_placeholder: Option<MemoryRegion>,
    pub exhaustion_policy: ExhaustionPolicy,
}

/// Configuration validation failures.
#[must_use = "configuration errors must be handled"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    SlotCount(usize),
    NoAddressModes,
    GuardSize(usize),
    NullGuardSize(usize),
    PlaceholderRange,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::SlotCount(n) => write!(f, "unsupported SPMP slot count {}", n),
            ConfigError::NoAddressModes => f.write_str("no SPMP addressing mode enabled"),
            ConfigError::GuardSize(n) => write!(f, "bad stack guard size {:#x}", n),
            ConfigError::NullGuardSize(n) => write!(f, "bad null guard size {:#x}", n),
            ConfigError::PlaceholderRange => f.write_str("misaligned user placeholder region"),
        }
    }
}

const fn feature_modes() -> AddressModes {
    let mut bits = AddressModes::all().bits();
    if cfg!(feature = "no_tor") {
        bits &= !AddressModes::TOR.bits();
    }
    if cfg!(feature = "no_na4") {
        bits &= !AddressModes::NA4.bits();
    }
    if cfg!(feature = "no_napot") {
        bits &= !AddressModes::NAPOT.bits();
    }
    AddressModes::from_bits_truncate(bits)
}

impl Config {
    /// Configuration selected by the enabled Cargo features.
    pub const fn from_features() -> Self {
        Self {
            slots: MAX_SLOTS,
            modes: feature_modes(),
            stack_guard: cfg!(feature = "stack_guard"),
            stack_guard_size: DEFAULT_STACK_GUARD_SIZE,
            userspace: cfg!(feature = "userspace"),
            null_guard: if cfg!(feature = "null_guard") {
                Some(DEFAULT_NULL_GUARD_SIZE)
            } else {
                None
            },
            smp: cfg!(feature = "smp"),
            multithreading: !cfg!(feature = "single_thread"),
            qemu_workaround: cfg!(feature = "qemu_workaround"),
            pow2_alignment: cfg!(feature = "pow2_alignment"),
            user_placeholder: if cfg!(feature = "user_placeholder") {
                Some(USER_PLACEHOLDER)
            } else {
                None
            },
            exhaustion_policy: if cfg!(feature = "terminate_on_exhaustion") {
                ExhaustionPolicy::TerminateThread
            } else {
                ExhaustionPolicy::DenyPartition
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots == 0 || self.slots > MAX_SLOTS || self.slots % CFG_STRIDE != 0 {
            return Err(ConfigError::SlotCount(self.slots));
        }
        if self.modes.is_empty() {
            return Err(ConfigError::NoAddressModes);
        }
        if self.stack_guard && !self.region_size_ok(self.stack_guard_size) {
            return Err(ConfigError::GuardSize(self.stack_guard_size));
        }
        if let Some(size) = self.null_guard {
            if !self.region_size_ok(size) {
                return Err(ConfigError::NullGuardSize(size));
            }
        }
        if let Some(region) = self.user_placeholder {
            if region.start % MIN_REGION != 0 || region.size % MIN_REGION != 0 || region.size == 0 {
                return Err(ConfigError::PlaceholderRange);
            }
        }
        Ok(())
    }

    fn region_size_ok(&self, size: usize) -> bool {
        size >= MIN_REGION
            && size % MIN_REGION == 0
            && (!self.pow2_alignment || size.is_power_of_two())
    }

    /// Slots a user thread stack mapping is expected to cost.
    #[inline]
    pub const fn user_stack_slots(&self) -> usize {
        if self.pow2_alignment {
            1
        } else {
            2
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_features()
    }
}

/// Linker- and boot-provided memory layout consumed by the global table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootLayout {
    /// Read-only code/data region (`__rom_region_start`/`__rom_region_size`).
    pub rom_start: usize,
    pub rom_size: usize,
    /// Writable kernel RAM.
    pub ram_start: usize,
    pub ram_size: usize,
    /// Bottom of each CPU's interrupt stack.
    pub irq_stacks: [usize; MAX_CPUS],
    /// Bottom of the boot/main stack (used without a scheduler).
    pub main_stack: usize,
}

impl BootLayout {
    /// Whether `[start, start + size)` lies inside the read-only region.
    #[inline]
    pub const fn in_rom(&self, start: usize, size: usize) -> bool {
        crate::slots::is_within(start, size, self.rom_start, self.rom_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_features_validate() {
        let config = Config::from_features();
        assert_eq!(config.slots, MAX_SLOTS);
        assert!(config.validate().is_ok());
        assert_eq!(config.stack_guard, cfg!(feature = "stack_guard"));
        assert_eq!(config.null_guard.is_some(), cfg!(feature = "null_guard"));
    }

    #[test]
    fn slot_count_must_fill_whole_cfg_registers() {
        let mut config = Config::from_features();
        config.slots = CFG_STRIDE + 1;
        assert_eq!(config.validate(), Err(ConfigError::SlotCount(CFG_STRIDE + 1)));
        config.slots = 0;
        assert_eq!(config.validate(), Err(ConfigError::SlotCount(0)));
        config.slots = MAX_SLOTS + CFG_STRIDE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn guard_sizes_follow_alignment_requirements() {
        let mut config = Config::from_features();
        config.stack_guard = true;
        config.stack_guard_size = 0x30;
        assert!(config.validate().is_ok());
        config.pow2_alignment = true;
        assert_eq!(config.validate(), Err(ConfigError::GuardSize(0x30)));
        config.stack_guard_size = 0x40;
        config.null_guard = Some(2);
        assert_eq!(config.validate(), Err(ConfigError::NullGuardSize(2)));
    }

    #[test]
    fn empty_mode_set_is_rejected() {
        let mut config = Config::from_features();
        config.modes = AddressModes::empty();
        assert_eq!(config.validate(), Err(ConfigError::NoAddressModes));
    }

    #[test]
    fn rom_containment() {
        let layout = BootLayout {
            rom_start: 0x8000_0000,
            rom_size: 0x1_0000,
            ram_start: 0x8001_0000,
            ram_size: 0x1_0000,
            irq_stacks: [0; MAX_CPUS],
            main_stack: 0,
        };
        assert!(layout.in_rom(0x8000_0100, 0x10));
        assert!(!layout.in_rom(0x8000_fff8, 0x10));
    }
}
