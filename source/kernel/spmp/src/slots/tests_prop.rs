// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the region encoder
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Naturally aligned power-of-two regions always take one NAPOT slot
//!   - NAPOT address fields decode back to the region start
//!   - Abutting regions continue off the previous TOR bound
//!   - Every successful append covers exactly the requested range
//!
//! TEST_SCENARIOS:
//!   - napot_selected_and_decodes(): power-of-two, aligned -> NAPOT, decode == start
//!   - abutting_tor_costs_one_slot(): start2 == end1 -> second region uses one slot
//!   - appended_range_decodes_exactly(): decoded range of the last slot == request
//!   - failure_preserves_array(): a failed append never changes the array

use super::{AddressMode, AddressModes, EncodeError, SlotArray, SpmpPerm};
use proptest::prelude::*;

fn arb_napot_region() -> impl Strategy<Value = (usize, usize)> {
    // 8 bytes .. 256 MiB, start aligned to size inside a 4 GiB window.
    (3u32..28, any::<u32>()).prop_map(|(order, raw)| {
        let size = 1usize << order;
        let start = (raw as usize) & !(size - 1);
        (start, size)
    })
}

fn arb_aligned_region() -> impl Strategy<Value = (usize, usize)> {
    (1usize..0x4000, 1usize..0x4000).prop_map(|(start_words, size_words)| {
        (0x8000_0000 + start_words * 4, size_words * 4)
    })
}

fn arb_perm() -> impl Strategy<Value = SpmpPerm> {
    (0u8..8).prop_map(SpmpPerm::from_bits_truncate)
}

proptest! {
    #[test]
    fn napot_selected_and_decodes((start, size) in arb_napot_region(), perm in arb_perm()) {
        prop_assume!(start != 0);
        let mut slots = SlotArray::EMPTY;
        slots.append(AddressModes::all(), perm, start, size).expect("append");
        prop_assert_eq!(slots.len(), 1);
        prop_assert_eq!(slots.mode(0), AddressMode::Napot);
        prop_assert_eq!((slots.addr(0) << 2) & !(size - 1), start);
        prop_assert_eq!(slots.decoded(0), Some(start..start + size));
    }

    #[test]
    fn abutting_tor_costs_one_slot((start, size) in arb_aligned_region(), next in 1usize..0x4000) {
        let mut slots = SlotArray::EMPTY;
        slots.append(AddressModes::TOR, SpmpPerm::R, start, size).expect("append");
        let used = slots.len();
        slots.append(AddressModes::all(), SpmpPerm::W, start + size, next * 4).expect("append");
        prop_assert_eq!(slots.len(), used + 1);
        prop_assert_eq!(slots.mode(used), AddressMode::Tor);
    }

    #[test]
    fn appended_range_decodes_exactly((start, size) in arb_aligned_region(), perm in arb_perm()) {
        let mut slots = SlotArray::EMPTY;
        slots.append(AddressModes::all(), perm, start, size).expect("append");
        let last = slots.len() - 1;
        prop_assert_eq!(slots.decoded(last), Some(start..start + size));
        prop_assert_eq!(slots.perm(last), perm);
        prop_assert!(slots.is_enabled(last));
    }

    #[test]
    fn failure_preserves_array(
        regions in proptest::collection::vec(arb_aligned_region(), 1..12),
        capacity in 1usize..6,
    ) {
        let mut slots = SlotArray::with_capacity(capacity);
        for (start, size) in regions {
            let before = slots.clone();
            match slots.append(AddressModes::all(), SpmpPerm::R, start, size) {
                Ok(()) => prop_assert!(slots.len() > before.len()),
                Err(err) => {
                    prop_assert_eq!(err, EncodeError::SlotsExhausted);
                    prop_assert_eq!(&slots, &before);
                }
            }
            prop_assert!(slots.len() <= capacity);
        }
    }
}
