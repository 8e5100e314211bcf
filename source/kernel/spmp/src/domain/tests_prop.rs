// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for domain versioning and resync
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Every successful add/remove strictly increases the version
//!   - Rejected operations never change the version
//!   - Resync under the deny policy always stamps the domain version
//!   - Resync never writes below the domain offset nor past capacity
//!
//! TEST_SCENARIOS:
//!   - version_counts_successful_mutations(): version == number of successful ops
//!   - resync_stays_in_thread_range(): prefix untouched, len <= capacity, version stamped

use super::*;
use crate::slots::SlotArray;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Add { page: usize, pages: usize },
    Remove { index: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..64, 1usize..4).prop_map(|(page, pages)| Op::Add { page, pages }),
        (0usize..MAX_PARTITIONS).prop_map(|index| Op::Remove { index }),
    ]
}

fn apply(domain: &MemoryDomain, op: &Op) -> bool {
    match *op {
        Op::Add { page, pages } => domain
            .add_partition(
                Partition::new(0x9000_0000 + page * 0x1000, pages * 0x1000, SpmpPerm::R),
                MAX_PARTITIONS,
            )
            .is_ok(),
        Op::Remove { index } => {
            let id = PartitionId::from_index(index).expect("bounded index");
            domain.remove_partition(id).is_ok()
        }
    }
}

proptest! {
    #[test]
    fn version_counts_successful_mutations(ops in proptest::collection::vec(arb_op(), 1..48)) {
        let domain = MemoryDomain::new();
        let mut expected = 0u64;
        for op in &ops {
            let before = domain.update_nr();
            if apply(&domain, op) {
                expected += 1;
                prop_assert!(domain.update_nr() > before);
            } else {
                prop_assert_eq!(domain.update_nr(), before);
            }
        }
        prop_assert_eq!(domain.update_nr(), expected);
        prop_assert!(domain.num_partitions() <= MAX_PARTITIONS);
    }

    #[test]
    fn resync_stays_in_thread_range(
        ops in proptest::collection::vec(arb_op(), 1..32),
        offset in 1usize..8,
    ) {
        let domain = MemoryDomain::new();
        for op in &ops {
            apply(&domain, op);
        }
        let mut ctx = ThreadContext::new(crate::slots::MAX_SLOTS);
        for i in 0..offset {
            ctx.umode
                .append(AddressModes::all(), SpmpPerm::R, 0x8000_0000 + i * 0x1000, 0x1000)
                .expect("prefix");
        }
        ctx.domain_offset = ctx.umode.len();
        let prefix: SlotArray = ctx.umode.clone();

        let report = domain
            .resync(&mut ctx, AddressModes::all(), ExhaustionPolicy::DenyPartition)
            .expect("deny policy never fails");
        prop_assert_eq!(ctx.domain_update_nr(), domain.update_nr());
        prop_assert!(ctx.umode().len() <= ctx.umode().capacity());
        prop_assert!(report.mapped <= domain.num_partitions());
        for index in 0..prefix.len() {
            prop_assert_eq!(ctx.umode().addr(index), prefix.addr(index));
            prop_assert_eq!(ctx.umode().cfg(index), prefix.cfg(index));
        }
    }
}
