// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for slot encoding
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; mode selection order, slot accounting, failure atomicity

use super::*;

const ALL: AddressModes = AddressModes::all();
const RW: SpmpPerm = SpmpPerm::R.union(SpmpPerm::W);

#[test]
fn napot_matches_reference_encoding() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0x8000_0000, 0x1000).expect("napot");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots.mode(0), AddressMode::Napot);
    assert_eq!(slots.addr(0), (0x8000_0000 | ((0x1000 - 1) >> 1)) >> 2);
    assert_eq!(slots.decoded(0), Some(0x8000_0000..0x8000_1000));
}

#[test]
fn four_byte_region_uses_na4() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, SpmpPerm::R, 0x8000_0010, 4).expect("na4");
    assert_eq!(slots.mode(0), AddressMode::Na4);
    assert_eq!(slots.addr(0) << 2, 0x8000_0010);
    assert_eq!(slots.decoded(0), Some(0x8000_0010..0x8000_0014));
}

#[test]
fn adjacent_regions_share_a_tor_bound() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0x1000, 0x1000).expect("first");
    slots.append(ALL, RW, 0x2000, 0x1000).expect("second");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots.mode(0), AddressMode::Napot);
    // The NAPOT field of the first slot is not a plain end address, so the
    // second region only continues when the previous field equals its start.
    let mut tor_only = SlotArray::EMPTY;
    tor_only.append(AddressModes::TOR, RW, 0x1000, 0x1000).expect("first");
    assert_eq!(tor_only.len(), 2);
    tor_only.append(AddressModes::TOR, RW, 0x2000, 0x1000).expect("second");
    assert_eq!(tor_only.len(), 3);
    assert_eq!(tor_only.mode(2), AddressMode::Tor);
    assert_eq!(tor_only.decoded(2), Some(0x2000..0x3000));
}

#[test]
fn tor_continuation_from_zero_costs_one_slot() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0, 0x3000).expect("zero based");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots.mode(0), AddressMode::Tor);
    slots.append(ALL, SpmpPerm::R, 0x3000, 0x500).expect("continuation");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots.decoded(1), Some(0x3000..0x3500));
}

#[test]
fn unaligned_region_falls_back_to_two_tor_slots() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0x8000_0100, 0x300).expect("tor pair");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots.cfg(0), 0);
    assert!(!slots.is_enabled(0));
    assert!(slots.is_enabled(1));
    assert_eq!(slots.decoded(1), Some(0x8000_0100..0x8000_0400));
}

#[test]
fn switch_mask_tracks_enabled_slots() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0x8000_0100, 0x300).expect("tor pair");
    slots.append(ALL, RW, 0x9000_0000, 0x1000).expect("napot");
    assert_eq!(slots.switch_mask(), 0b110);
}

#[test]
fn na4_disabled_rejects_four_byte_napot() {
    let modes = AddressModes::NAPOT;
    let mut slots = SlotArray::EMPTY;
    assert_eq!(slots.append(modes, RW, 0x8000_0000, 4), Err(EncodeError::BadRange));
    slots.append(modes, RW, 0x8000_0000, 8).expect("eight bytes is fine");
}

#[test]
fn inexpressible_range_is_bad_range() {
    let mut slots = SlotArray::EMPTY;
    let modes = AddressModes::NA4 | AddressModes::NAPOT;
    assert_eq!(slots.append(modes, RW, 0x8000_0000, 0x300), Err(EncodeError::BadRange));
    assert_eq!(slots.append(modes, RW, 0x8000_0800, 0x1000), Err(EncodeError::BadRange));
    assert!(slots.is_empty());
}

#[test]
fn misaligned_inputs_are_rejected() {
    let mut slots = SlotArray::EMPTY;
    assert_eq!(slots.append(ALL, RW, 0x8000_0002, 0x1000), Err(EncodeError::BadRange));
    assert_eq!(slots.append(ALL, RW, 0x8000_0000, 0x1001), Err(EncodeError::BadRange));
    assert_eq!(slots.append(ALL, RW, usize::MAX - 3, 8), Err(EncodeError::BadRange));
}

#[test]
fn exhaustion_is_distinct_and_leaves_array_untouched() {
    let mut slots = SlotArray::with_capacity(2);
    slots.append(ALL, RW, 0x8000_0000, 0x1000).expect("first");
    let before = slots.clone();
    // Needs two slots, only one left.
    assert_eq!(slots.append(ALL, RW, 0x9000_0100, 0x300), Err(EncodeError::SlotsExhausted));
    assert_eq!(slots, before);
    slots.append(ALL, RW, 0x9000_0000, 0x1000).expect("one slot fits");
    assert_eq!(slots.append(ALL, RW, 0xa000_0000, 0x1000), Err(EncodeError::SlotsExhausted));
}

#[test]
fn truncate_turns_dropped_slots_off() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, RW, 0x8000_0000, 0x1000).expect("a");
    slots.append(ALL, RW, 0x9000_0000, 0x1000).expect("b");
    slots.truncate(1);
    assert_eq!(slots.len(), 1);
    assert_eq!(slots.cfg(1), 0);
    assert!(!slots.is_enabled(1));
    assert!(slots.is_enabled(0));
}

#[test]
fn clear_trailing_stops_at_register_boundary() {
    let mut slots = SlotArray::EMPTY;
    for i in 0..CFG_STRIDE + 1 {
        slots.append(ALL, RW, 0x8000_0000 + i * 0x1000, 0x1000).expect("fill");
    }
    slots.clear_trailing(1);
    assert_eq!(slots.cfg(0) & AddressMode::MASK, AddressMode::Napot as u8);
    for i in 1..CFG_STRIDE {
        assert_eq!(slots.cfg(i), 0);
        assert!(!slots.is_enabled(i));
    }
    // First slot of the next register is outside the partial register.
    assert!(slots.is_enabled(CFG_STRIDE));
}

#[test]
fn cfg_word_packs_little_endian() {
    let mut slots = SlotArray::EMPTY;
    slots.append(ALL, SpmpPerm::R, 0x8000_0000, 0x1000).expect("a");
    slots.append(ALL, SpmpPerm::W, 0x9000_0000, 4).expect("b");
    let word = slots.cfg_word(0);
    assert_eq!(word & 0xff, (SpmpPerm::R.bits() | AddressMode::Napot as u8) as usize);
    assert_eq!((word >> 8) & 0xff, (SpmpPerm::W.bits() | AddressMode::Na4 as u8) as usize);
    let mut copy = SlotArray::EMPTY;
    copy.set_cfg_word(0, word);
    assert_eq!(copy.cfg(1), slots.cfg(1));
}

#[test]
fn containment_is_overflow_safe() {
    assert!(is_within(0x1000, 0x10, 0x1000, 0x10));
    assert!(!is_within(0x1000, 0x11, 0x1000, 0x10));
    assert!(!is_within(0xfff, 0x4, 0x1000, 0x10));
    assert!(!is_within(usize::MAX - 1, 4, 0x1000, usize::MAX - 0x1000));
}
