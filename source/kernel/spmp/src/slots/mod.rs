// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SPMP shadow slot arrays and the region encoder
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests + proptest (mode selection, NAPOT decode, TOR continuation)
//! PUBLIC API: SlotArray (append/truncate/clear_trailing), SpmpPerm, AddressMode, AddressModes,
//!             MemoryRegion, EncodeError
//! DEPENDS_ON: bitflags, static_assertions
//! INVARIANTS: len <= capacity <= MAX_SLOTS; append-only; a failed append leaves the array
//!             untouched; every enabled slot has its switch bit set
//!
//! Slots are kept as three parallel arrays (addresses, config bytes, enable
//! mask) so a context switch is a straight copy into the CSRs. Config bytes
//! are packed `CFG_STRIDE` to a register, exactly as the hardware lays them
//! out.

use bitflags::bitflags;
use core::fmt;
use static_assertions::const_assert;

/// Number of shadow slots stored per array.
#[cfg(not(feature = "slots_64"))]
pub const MAX_SLOTS: usize = 16;
/// Number of shadow slots stored per array.
#[cfg(feature = "slots_64")]
pub const MAX_SLOTS: usize = 64;

/// Config bytes per spmpcfg register.
pub const CFG_STRIDE: usize = core::mem::size_of::<usize>();

/// Number of spmpcfg registers backing `MAX_SLOTS` entries.
pub const CFG_REGS: usize = MAX_SLOTS / CFG_STRIDE;

const_assert!(MAX_SLOTS % CFG_STRIDE == 0);
const_assert!(MAX_SLOTS <= u64::BITS as usize);

/// Smallest region any addressing mode can express.
pub const MIN_REGION: usize = 4;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// Permission bits of an spmpcfg byte.
    pub struct SpmpPerm: u8 {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
        /// Shared/supervisor region.
        const S = 1 << 7;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Addressing modes implemented by the hardware.
    pub struct AddressModes: u8 {
        const TOR = 1 << 0;
        const NA4 = 1 << 1;
        const NAPOT = 1 << 2;
    }
}

/// Address-matching field (`A`) of an spmpcfg byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressMode {
    Off = 0,
    Tor = 1 << 3,
    Na4 = 2 << 3,
    Napot = 3 << 3,
}

impl AddressMode {
    const MASK: u8 = 3 << 3;

    pub const fn from_cfg(cfg: u8) -> Self {
        match cfg & Self::MASK {
            0x08 => AddressMode::Tor,
            0x10 => AddressMode::Na4,
            0x18 => AddressMode::Napot,
            _ => AddressMode::Off,
        }
    }
}

/// A physical memory range with the permissions to grant on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: usize,
    pub size: usize,
    pub perm: SpmpPerm,
}

impl MemoryRegion {
    pub const fn new(start: usize, size: usize, perm: SpmpPerm) -> Self {
        Self { start, size, perm }
    }
}

/// Overflow-free `[inner_start, +inner_size) ⊆ [outer_start, +outer_size)`.
#[inline]
pub const fn is_within(
    inner_start: usize,
    inner_size: usize,
    outer_start: usize,
    outer_size: usize,
) -> bool {
    inner_start >= outer_start
        && inner_size <= outer_size
        && inner_start - outer_start <= outer_size - inner_size
}

/// Reasons a region could not be appended.
#[must_use = "encode failures must be handled"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// Not enough free slots for the cheapest usable mode.
    SlotsExhausted,
    /// The region is misaligned or no supported mode can express it.
    BadRange,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::SlotsExhausted => f.write_str("out of SPMP slots"),
            EncodeError::BadRange => f.write_str("inappropriate SPMP range"),
        }
    }
}

#[inline]
const fn spmp_addr(addr: usize) -> usize {
    addr >> 2
}

#[inline]
const fn napot_addr(start: usize, size: usize) -> usize {
    spmp_addr(start | ((size - 1) >> 1))
}

/// Fixed-capacity shadow copy of a run of SPMP slots.
#[derive(Clone, PartialEq, Eq)]
pub struct SlotArray {
    addr: [usize; MAX_SLOTS],
    cfg: [u8; MAX_SLOTS],
    switch: u64,
    len: usize,
    capacity: usize,
}

impl SlotArray {
    /// An empty array using every shadow slot.
    pub const EMPTY: Self = Self::with_capacity(MAX_SLOTS);

    /// Creates an empty array limited to `capacity` slots (clamped to `MAX_SLOTS`).
    pub const fn with_capacity(capacity: usize) -> Self {
        let capacity = if capacity > MAX_SLOTS { MAX_SLOTS } else { capacity };
        Self { addr: [0; MAX_SLOTS], cfg: [0; MAX_SLOTS], switch: 0, len: 0, capacity }
    }

    /// Index of the next slot to be written.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn addr(&self, index: usize) -> usize {
        self.addr[index]
    }

    #[inline]
    pub fn cfg(&self, index: usize) -> u8 {
        self.cfg[index]
    }

    #[inline]
    pub fn mode(&self, index: usize) -> AddressMode {
        AddressMode::from_cfg(self.cfg[index])
    }

    #[inline]
    pub fn perm(&self, index: usize) -> SpmpPerm {
        SpmpPerm::from_bits_truncate(self.cfg[index])
    }

    #[inline]
    pub const fn switch_mask(&self) -> u64 {
        self.switch
    }

    #[inline]
    pub const fn is_enabled(&self, index: usize) -> bool {
        self.switch & (1 << index) != 0
    }

    /// Value of spmpcfg register `reg` (little-endian packing of `CFG_STRIDE` bytes).
    pub fn cfg_word(&self, reg: usize) -> usize {
        let base = reg * CFG_STRIDE;
        let mut bytes = [0u8; CFG_STRIDE];
        bytes.copy_from_slice(&self.cfg[base..base + CFG_STRIDE]);
        usize::from_le_bytes(bytes)
    }

    pub(crate) fn set_cfg_word(&mut self, reg: usize, word: usize) {
        let base = reg * CFG_STRIDE;
        self.cfg[base..base + CFG_STRIDE].copy_from_slice(&word.to_le_bytes());
    }

    pub(crate) fn set_addr(&mut self, index: usize, addr: usize) {
        self.addr[index] = addr;
    }

    pub(crate) fn set_switch_mask(&mut self, switch: u64) {
        self.switch = switch;
    }

    /// Moves the append cursor to `len` without touching slot contents.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len.min(self.capacity);
    }

    /// Drops every slot at or above `len`, turning them off.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        for index in len..self.len {
            self.addr[index] = 0;
            self.cfg[index] = 0;
            self.switch &= !(1 << index);
        }
        self.len = len;
    }

    /// Zeroes config bytes and enable bits from `end` up to the next cfg register
    /// boundary so a partial register write cannot carry stale entries.
    pub fn clear_trailing(&mut self, end: usize) {
        let mut index = end;
        while index % CFG_STRIDE != 0 && index < MAX_SLOTS {
            self.cfg[index] = 0;
            self.switch &= !(1 << index);
            index += 1;
        }
    }

    fn push(&mut self, addr: usize, cfg: u8, enable: bool) {
        let index = self.len;
        self.addr[index] = addr;
        self.cfg[index] = cfg;
        if enable {
            self.switch |= 1 << index;
        }
        self.len += 1;
    }

    /// Appends `[start, start + size)` with `perm`, choosing the cheapest mode in `modes`.
    ///
    /// Selection order: TOR continuation off the previous slot (1 slot), NA4 (1 slot),
    /// NAPOT (1 slot), TOR with an explicit lower bound (2 slots).
    pub fn append(
        &mut self,
        modes: AddressModes,
        perm: SpmpPerm,
        start: usize,
        size: usize,
    ) -> Result<(), EncodeError> {
        let index = self.len;

        if start & 0x3 != 0 || size & 0x3 != 0 {
            log_error!(target: "spmp", "misaligned SPMP range (start={:#x} size={:#x})", start, size);
            return Err(EncodeError::BadRange);
        }
        let Some(end) = start.checked_add(size) else {
            log_error!(target: "spmp", "SPMP range wraps (start={:#x} size={:#x})", start, size);
            return Err(EncodeError::BadRange);
        };
        if index >= self.capacity {
            log_error!(target: "spmp", "out of SPMP slots");
            return Err(EncodeError::SlotsExhausted);
        }

        let tor = modes.contains(AddressModes::TOR);
        let na4 = modes.contains(AddressModes::NA4);
        let napot = modes.contains(AddressModes::NAPOT);
        let cfg = perm.bits();

        let continues = if index == 0 { start == 0 } else { self.addr[index - 1] == spmp_addr(start) };
        if tor && continues {
            self.push(spmp_addr(end), cfg | AddressMode::Tor as u8, true);
        } else if na4 && size == 4 {
            self.push(spmp_addr(start), cfg | AddressMode::Na4 as u8, true);
        } else if napot && size > 4 && size.is_power_of_two() && start & (size - 1) == 0 {
            self.push(napot_addr(start, size), cfg | AddressMode::Napot as u8, true);
        } else if tor && index + 1 >= self.capacity {
            log_error!(target: "spmp", "out of SPMP slots");
            return Err(EncodeError::SlotsExhausted);
        } else if tor {
            self.push(spmp_addr(start), 0, false);
            self.push(spmp_addr(end), cfg | AddressMode::Tor as u8, true);
        } else {
            log_error!(
                target: "spmp",
                "inappropriate SPMP range (start={:#x} size={:#x})",
                start,
                size
            );
            return Err(EncodeError::BadRange);
        }
        Ok(())
    }

    /// Appends a whole region.
    #[inline]
    pub fn append_region(
        &mut self,
        modes: AddressModes,
        region: &MemoryRegion,
    ) -> Result<(), EncodeError> {
        self.append(modes, region.perm, region.start, region.size)
    }

    /// Physical range matched by slot `index`, or `None` when it is off.
    pub fn decoded(&self, index: usize) -> Option<core::ops::Range<usize>> {
        if index >= self.len {
            return None;
        }
        let addr = self.addr[index];
        match self.mode(index) {
            AddressMode::Off => None,
            AddressMode::Tor => {
                let bottom = if index == 0 { 0 } else { self.addr[index - 1] << 2 };
                Some(bottom..addr << 2)
            }
            AddressMode::Na4 => Some(addr << 2..(addr << 2) + 4),
            AddressMode::Napot => {
                let ones = addr.trailing_ones();
                let size = 1usize.checked_shl(ones + 3)?;
                let start = (addr & !((1usize << ones) - 1)) << 2;
                start.checked_add(size).map(|end| start..end)
            }
        }
    }
}

impl Default for SlotArray {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for SlotArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for index in 0..self.len {
            list.entry(&format_args!(
                "#{} addr={:#x} cfg={:#04x} {:?}{}",
                index,
                self.addr[index] << 2,
                self.cfg[index],
                self.mode(index),
                if self.is_enabled(index) { "" } else { " (off)" }
            ));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_prop;
