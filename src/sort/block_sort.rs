//! Per-block, in-place introspective-quicksort-variant tuple sort.
//!
//! Sorts the tuples already resident in one block by their resolved column
//! values, using a caller-supplied comparator. Non-inlined storage is never
//! touched — a tuple's string refs move with its inline body (see
//! [`crate::block::Block::swap_tuples`]), so sorting a block never needs to
//! allocate or copy variable-length data.
//!
//! Lomuto partition on the last element; after partitioning, recurses into
//! the smaller side and loops into the larger one, bounding stack depth to
//! `O(log n)`. Switches to insertion sort once a partition's length drops
//! to 4 or fewer, which is faster than recursing further at that size and
//! avoids partition overhead on tiny runs.
use crate::block::Block;

use super::Comparator;

/// Sorts every active tuple in `block` in place, ordered by `cmp` applied to
/// each pair of tuple indices via [`crate::block::Block::value_at`].
pub fn sort_block(block: &mut Block, cmp: &Comparator) {
    let len = block.active_tuple_count();
    if len < 2 {
        return;
    }
    quicksort(block, 0, len - 1, cmp);
}

fn quicksort(block: &mut Block, mut lo: u32, mut hi: u32, cmp: &Comparator) {
    loop {
        let len = hi - lo + 1;
        if len <= 4 {
            insertion_sort(block, lo, hi, cmp);
            return;
        }

        let p = partition(block, lo, hi, cmp);

        // Recurse into the smaller side, loop into the larger one.
        if p > lo && p - lo < hi - p {
            if p > lo {
                quicksort(block, lo, p - 1, cmp);
            }
            lo = p + 1;
        } else {
            if p < hi {
                quicksort(block, p + 1, hi, cmp);
            }
            if p == lo {
                return;
            }
            hi = p - 1;
        }
    }
}

fn partition(block: &mut Block, lo: u32, hi: u32, cmp: &Comparator) -> u32 {
    let mut i = lo;
    for j in lo..hi {
        if cmp(&*block, j, &*block, hi) == std::cmp::Ordering::Less {
            block.swap_tuples(i, j);
            i += 1;
        }
    }
    block.swap_tuples(i, hi);
    i
}

fn insertion_sort(block: &mut Block, lo: u32, hi: u32, cmp: &Comparator) {
    let mut i = lo + 1;
    while i <= hi {
        let mut j = i;
        while j > lo && cmp(&*block, j - 1, &*block, j) == std::cmp::Ordering::Greater {
            block.swap_tuples(j - 1, j);
            j -= 1;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, ColumnType, Schema};
    use crate::value::{TupleLiteral, Value};
    use std::sync::Arc;

    fn by_int_column(a: &Block, ai: u32, b: &Block, bi: u32) -> std::cmp::Ordering {
        let av = match a.value_at(ai, 0) {
            Value::Integer(v) => v,
            _ => unreachable!("key column is always Integer"),
        };
        let bv = match b.value_at(bi, 0) {
            Value::Integer(v) => v,
            _ => unreachable!("key column is always Integer"),
        };
        av.cmp(&bv)
    }

    fn values_in_order(block: &Block) -> Vec<i32> {
        (0..block.active_tuple_count())
            .map(|i| match block.value_at(i, 0) {
                Value::Integer(v) => v,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn sorts_a_small_block_via_insertion_sort_path() {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut block = Block::new(1, schema);
        for n in &[4, 1, 3, 2] {
            let mut t = TupleLiteral::new();
            t.push(Value::Integer(*n));
            block.insert(&t).unwrap();
        }
        sort_block(&mut block, &by_int_column);
        assert_eq!(values_in_order(&block), vec![1, 2, 3, 4]);
    }

    #[test]
    fn sorts_a_larger_block_that_exercises_partitioning() {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut block = Block::new(1, schema);
        let input = [9, 3, 7, 1, 8, 2, 6, 4, 0, 5, -3, 42, 17, 11];
        for n in &input {
            let mut t = TupleLiteral::new();
            t.push(Value::Integer(*n));
            block.insert(&t).unwrap();
        }
        sort_block(&mut block, &by_int_column);
        let mut expected = input.to_vec();
        expected.sort();
        assert_eq!(values_in_order(&block), expected);
    }

    #[test]
    fn sorting_preserves_non_inlined_data() {
        let schema = Arc::new(Schema::new(vec![
            ColumnInfo::new("n", ColumnType::Integer),
            ColumnInfo::new("label", ColumnType::VarChar { max_length: 64 }),
        ]));
        let mut block = Block::new(1, schema);
        for (n, label) in &[(3, "three"), (1, "one"), (2, "two")] {
            let mut t = TupleLiteral::new();
            t.push(Value::Integer(*n));
            t.push(Value::Str(label.to_string()));
            block.insert(&t).unwrap();
        }
        sort_block(&mut block, &by_int_column);
        assert_eq!(values_in_order(&block), vec![1, 2, 3]);
        assert_eq!(block.value_at(0, 1), Value::Str("one".to_string()));
        assert_eq!(block.value_at(1, 1), Value::Str("two".to_string()));
        assert_eq!(block.value_at(2, 1), Value::Str("three".to_string()));
    }

    #[test]
    fn sorting_orders_by_resolved_varchar_value_not_raw_string_ref_bytes() {
        // The non-inlined payloads are inserted in an order that makes the
        // string refs' own raw byte encoding (address, length) disagree
        // with alphabetical order of the referenced text, so this only
        // passes if the comparator resolves actual column values.
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new(
            "label",
            ColumnType::VarChar { max_length: 64 },
        )]));
        let mut block = Block::new(1, schema);
        for label in &["delta", "alpha", "charlie", "bravo"] {
            let mut t = TupleLiteral::new();
            t.push(Value::Str(label.to_string()));
            block.insert(&t).unwrap();
        }

        fn by_label(a: &Block, ai: u32, b: &Block, bi: u32) -> std::cmp::Ordering {
            let av = match a.value_at(ai, 0) {
                Value::Str(s) => s,
                _ => unreachable!(),
            };
            let bv = match b.value_at(bi, 0) {
                Value::Str(s) => s,
                _ => unreachable!(),
            };
            av.cmp(&bv)
        }

        sort_block(&mut block, &by_label);
        let labels: Vec<String> = (0..block.active_tuple_count())
            .map(|i| match block.value_at(i, 0) {
                Value::Str(s) => s,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(labels, vec!["alpha", "bravo", "charlie", "delta"]);
    }

    #[test]
    fn already_sorted_and_empty_blocks_are_handled() {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut empty = Block::new(1, schema.clone());
        sort_block(&mut empty, &by_int_column);
        assert_eq!(empty.active_tuple_count(), 0);

        let mut sorted = Block::new(2, schema);
        for n in 0..10 {
            let mut t = TupleLiteral::new();
            t.push(Value::Integer(n));
            sorted.insert(&t).unwrap();
        }
        sort_block(&mut sorted, &by_int_column);
        assert_eq!(values_in_order(&sorted), (0..10).collect::<Vec<_>>());
    }
}
