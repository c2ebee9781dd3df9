// Property tests for the spill boundary: for any input and any budget, a
// spilled execution must produce exactly the same output as an in-memory
// execution.

use std::sync::Arc;

use proptest::prelude::*;

use fraudsift::primitives::{group_sorted, ExternalSorter, ScratchSpace};

fn sort_rows(rows: &[(u8, u32)], budget: usize) -> Vec<(u8, u32)> {
    let scratch = Arc::new(ScratchSpace::new(None, 64 * 1024 * 1024).unwrap());
    let mut sorter = ExternalSorter::new(scratch, budget, |row: &(u8, u32)| row.0);
    for row in rows {
        sorter.push(*row).unwrap();
    }
    sorter
        .finish()
        .unwrap()
        .map(|row| row.unwrap())
        .collect()
}

fn group_sums(rows: &[(u8, u32)], budget: usize) -> Vec<(u8, u64)> {
    let scratch = Arc::new(ScratchSpace::new(None, 64 * 1024 * 1024).unwrap());
    let mut sorter = ExternalSorter::new(scratch, budget, |row: &(u8, u32)| row.0);
    for row in rows {
        sorter.push(*row).unwrap();
    }
    group_sorted(sorter.finish().unwrap(), |row| row.0)
        .map(|group| {
            let (key, members) = group.unwrap();
            (key, members.iter().map(|m| m.1 as u64).sum())
        })
        .collect()
}

proptest! {
    #[test]
    fn spilled_sort_equals_in_memory_sort(
        rows in proptest::collection::vec((any::<u8>(), any::<u32>()), 0..300),
        budget in 0usize..256,
    ) {
        let spilled = sort_rows(&rows, budget);
        let in_memory = sort_rows(&rows, usize::MAX);
        prop_assert_eq!(&spilled, &in_memory);

        // Both must equal a plain stable sort of the input.
        let mut expected = rows.clone();
        expected.sort_by_key(|row| row.0);
        prop_assert_eq!(spilled, expected);
    }

    #[test]
    fn grouped_aggregation_is_budget_independent(
        rows in proptest::collection::vec((0u8..8, any::<u32>()), 0..200),
        budget in 0usize..128,
    ) {
        let spilled = group_sums(&rows, budget);
        let in_memory = group_sums(&rows, usize::MAX);
        prop_assert_eq!(spilled, in_memory);
    }
}
