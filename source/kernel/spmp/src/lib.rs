// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: NEURON S-mode physical memory protection (SPMP) engine
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Host unit + property tests (encoder, writer, domains, faults)
//! PUBLIC API: Spmp (init_global, stack guard, usermode, domains, validate_buffer, on_fault)
//! DEPENDS_ON: SlotWriter (hardware primitive), FatalHandler (fatal escalation)
//! INVARIANTS: Global slots written once per hart; thread writes never leave their slot range;
//!             domain lock never held across a hardware write

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]

#[macro_use]
pub mod log;

mod arch;
pub mod config;
pub mod domain;
pub mod engine;
pub mod fault;
pub mod global;
pub mod hw;
pub mod slots;
pub mod thread;
pub mod types;
mod uart;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use config::{BootLayout, Config, ConfigError, ExhaustionPolicy};
pub use domain::{DomainError, MemoryDomain, Partition, PartitionId, ResyncError, ResyncReport};
pub use engine::Spmp;
pub use fault::{ExceptionFixup, FatalHandler, FatalReason, FaultOutcome, ProbeFault, TrapFrame};
pub use global::GlobalTable;
pub use hw::{CsrSlots, SlotWriter};
pub use slots::{AddressMode, AddressModes, EncodeError, MemoryRegion, SlotArray, SpmpPerm};
pub use thread::{KernelThread, PrepareError, StackLayout, ThreadContext};
pub use types::CpuId;
