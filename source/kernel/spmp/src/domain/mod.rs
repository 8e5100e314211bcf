// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory domains and U-mode slot resynchronisation
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + proptest (versioning, hole skipping, exhaustion policies)
//! PUBLIC API: MemoryDomain (add/remove/resync), Partition, PartitionId, ResyncReport,
//!             ResyncError, DomainError, RESYNC_PERM
//! DEPENDS_ON: spin::Mutex, slots (encoder), thread::ThreadContext
//! INVARIANTS: update_nr strictly increases on every add/remove; the domain lock is held
//!             for the scan only, never across a hardware write; a thread's cached
//!             version equals the domain version right after a successful resync
//!
//! Threads pull the domain version on their way to user mode; the domain never
//! pushes updates to its members.

use core::fmt;

use spin::Mutex;
use static_assertions::const_assert;

use crate::config::ExhaustionPolicy;
use crate::slots::{is_within, AddressModes, EncodeError, SpmpPerm, MIN_REGION};
use crate::thread::ThreadContext;

/// Partition table size of a domain.
pub const MAX_PARTITIONS: usize = 16;

const_assert!(MAX_PARTITIONS <= u32::BITS as usize);

/// Permission every resynchronised partition is mapped with.
///
/// Partition attributes are not consulted here; `validate_buffer` is the only
/// consumer of `Partition::perm`.
pub const RESYNC_PERM: SpmpPerm = SpmpPerm::W.union(SpmpPerm::X);

/// A memory range shared with the threads of a domain. Size 0 marks a hole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub start: usize,
    pub size: usize,
    pub perm: SpmpPerm,
}

impl Partition {
    pub const HOLE: Self = Self { start: 0, size: 0, perm: SpmpPerm::empty() };

    pub const fn new(start: usize, size: usize, perm: SpmpPerm) -> Self {
        Self { start, size, perm }
    }

    #[inline]
    pub const fn is_hole(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub const fn contains(&self, start: usize, size: usize) -> bool {
        is_within(start, size, self.start, self.size)
    }
}

/// Index of a partition slot inside its domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PartitionId(u8);

impl PartitionId {
    #[inline]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_PARTITIONS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partition table maintenance failures.
#[must_use = "domain errors must be handled"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainError {
    /// Zero-sized partitions cannot be added.
    EmptyPartition,
    /// The slot budget estimate for user threads is used up.
    LimitReached { max: usize },
    /// Every partition slot is taken.
    Full,
    UnknownPartition(PartitionId),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::EmptyPartition => f.write_str("empty partition"),
            DomainError::LimitReached { max } => write!(f, "domain limited to {} partitions", max),
            DomainError::Full => f.write_str("partition table full"),
            DomainError::UnknownPartition(id) => write!(f, "no partition {}", id),
        }
    }
}

/// Resync failure under `ExhaustionPolicy::TerminateThread`.
#[must_use = "the offending thread must be terminated"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncError {
    SlotsExhausted { partition: PartitionId, remaining: usize },
}

impl fmt::Display for ResyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncError::SlotsExhausted { partition, remaining } => write!(
                f,
                "no SPMP slot left for partition {} ({} remaining)",
                partition, remaining
            ),
        }
    }
}

/// Outcome of a successful resync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Partitions now mapped in the U-mode copy.
    pub mapped: usize,
    /// Bit `i`: partition `i` did not fit and stays unmapped.
    pub denied: u32,
    /// Bit `i`: partition `i` is smaller than any mappable region.
    pub too_small: u32,
}

impl ResyncReport {
    #[inline]
    pub const fn is_denied(&self, id: PartitionId) -> bool {
        self.denied & (1 << id.0) != 0
    }

    #[inline]
    pub const fn denied_count(&self) -> u32 {
        self.denied.count_ones()
    }

    #[inline]
    pub const fn is_complete(&self) -> bool {
        self.denied == 0 && self.too_small == 0
    }
}

struct DomainState {
    partitions: [Partition; MAX_PARTITIONS],
    num_partitions: usize,
    update_nr: u64,
}

impl DomainState {
    const fn new() -> Self {
        Self { partitions: [Partition::HOLE; MAX_PARTITIONS], num_partitions: 0, update_nr: 0 }
    }

    /// Non-hole partitions in table order.
    fn live(&self) -> impl Iterator<Item = (PartitionId, &Partition)> {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, part)| !part.is_hole())
            .take(self.num_partitions)
            .map(|(index, part)| (PartitionId(index as u8), part))
    }
}

/// Partition table shared by a set of threads.
pub struct MemoryDomain {
    state: Mutex<DomainState>,
}

impl MemoryDomain {
    pub const fn new() -> Self {
        Self { state: Mutex::new(DomainState::new()) }
    }

    /// Drops every partition and restarts versioning at 0.
    pub fn init(&self) {
        *self.state.lock() = DomainState::new();
    }

    pub fn update_nr(&self) -> u64 {
        self.state.lock().update_nr
    }

    pub fn num_partitions(&self) -> usize {
        self.state.lock().num_partitions
    }

    pub fn partition(&self, id: PartitionId) -> Option<Partition> {
        let state = self.state.lock();
        let part = state.partitions[id.as_index()];
        (!part.is_hole()).then_some(part)
    }

    /// Adds `part` in the first free slot unless `limit` partitions already exist.
    pub fn add_partition(&self, part: Partition, limit: usize) -> Result<PartitionId, DomainError> {
        if part.is_hole() {
            return Err(DomainError::EmptyPartition);
        }
        let mut state = self.state.lock();
        if state.num_partitions >= limit {
            return Err(DomainError::LimitReached { max: limit });
        }
        let index = state.partitions.iter().position(Partition::is_hole).ok_or(DomainError::Full)?;
        state.partitions[index] = part;
        state.num_partitions += 1;
        state.update_nr += 1;
        Ok(PartitionId(index as u8))
    }

    pub fn remove_partition(&self, id: PartitionId) -> Result<Partition, DomainError> {
        let mut state = self.state.lock();
        let slot = &mut state.partitions[id.as_index()];
        if slot.is_hole() {
            return Err(DomainError::UnknownPartition(id));
        }
        let removed = core::mem::replace(slot, Partition::HOLE);
        state.num_partitions -= 1;
        state.update_nr += 1;
        Ok(removed)
    }

    /// First partition fully containing `[start, start + size)`.
    pub fn find_containing(&self, start: usize, size: usize) -> Option<Partition> {
        let state = self.state.lock();
        let found = state.live().map(|(_, part)| *part).find(|part| part.contains(start, size));
        found
    }

    /// Rebuilds the domain part of `ctx`'s U-mode copy from the partition table.
    ///
    /// Holds the domain lock for the scan only; the caller writes the result
    /// to hardware afterwards.
    pub fn resync(
        &self,
        ctx: &mut ThreadContext,
        modes: AddressModes,
        policy: ExhaustionPolicy,
    ) -> Result<ResyncReport, ResyncError> {
        let state = self.state.lock();
        let offset = ctx.domain_offset;
        ctx.umode.truncate(offset);

        let mut report = ResyncReport::default();
        let mut remaining = state.num_partitions;
        for (id, part) in state.live() {
            remaining -= 1;
            if part.size < MIN_REGION {
                log_error!(target: "spmp", "non-empty partition {} too small ({:#x})", id, part.size);
                report.too_small |= 1 << id.0;
                continue;
            }
            match ctx.umode.append(modes, RESYNC_PERM, part.start, part.size) {
                Ok(()) => report.mapped += 1,
                Err(EncodeError::SlotsExhausted) => match policy {
                    ExhaustionPolicy::DenyPartition => {
                        log_error!(
                            target: "spmp",
                            "no SPMP slot left for {} remaining partitions, partition {} denied",
                            remaining + 1,
                            id
                        );
                        report.denied |= 1 << id.0;
                    }
                    ExhaustionPolicy::TerminateThread => {
                        ctx.umode.truncate(offset);
                        return Err(ResyncError::SlotsExhausted { partition: id, remaining: remaining + 1 });
                    }
                },
                Err(EncodeError::BadRange) => {
                    log_error!(target: "spmp", "partition {} cannot be expressed, denied", id);
                    report.denied |= 1 << id.0;
                }
            }
        }

        ctx.domain_update_nr = state.update_nr;
        Ok(report)
    }
}

impl Default for MemoryDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_lock() {
            Some(state) => f
                .debug_struct("MemoryDomain")
                .field("update_nr", &state.update_nr)
                .field("num_partitions", &state.num_partitions)
                .finish(),
            None => f.write_str("MemoryDomain(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests_prop;
