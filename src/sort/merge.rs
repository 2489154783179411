//! K-way merge of already-sorted runs into fresh output blocks.
//!
//! Each input block must already be individually sorted (see
//! [`super::block_sort`]). This drains all of them in parallel through a
//! min-heap keyed by the shared comparator, always emitting the globally
//! smallest remaining tuple next, and packs the result into as many
//! schema-sized output blocks as it takes.
//!
//! The heap holds run indices, not extracted keys: ordering is resolved
//! on demand by calling back into the comparator against each run's
//! current `(&Block, u32)` position, rather than snapshotting a tuple's
//! raw inline bytes as a heap key the way an off-the-shelf
//! `BinaryHeap<T: Ord>` would require. Pre-extracting raw bytes is exactly
//! what would make a merge key on a `VarChar` column compare its opaque
//! string-ref encoding instead of the referenced text.
//!
//! Output tuples are re-inserted value-by-value
//! ([`crate::block::Block::insert`]) rather than relocated
//! ([`crate::block::Block::insert_relocating`]): a merge interleaves tuples
//! from many distinct source blocks into one destination, so
//! [`crate::block::Block::copy_non_inlined`]'s "destination non-inlined
//! region must be empty" precondition — satisfiable only once, for one
//! source block — can't apply here.

use std::rc::Rc;
use std::sync::Arc;

use log::trace;

use super::run::SortRun;
use super::{Comparator, Error};
use crate::block::BlockId;
use crate::cache::BlockCache;
use crate::schema::Schema;

fn less(runs: &[SortRun], cmp: &Comparator, a: usize, b: usize) -> bool {
    let (block_a, idx_a) = runs[a].current().expect("heap only holds non-exhausted run indices");
    let (block_b, idx_b) = runs[b].current().expect("heap only holds non-exhausted run indices");
    cmp(block_a, idx_a, block_b, idx_b) == std::cmp::Ordering::Less
}

/// A min-heap over run indices, ordering resolved through the runs'
/// current tuples rather than a pre-extracted key. Plain array-backed
/// binary heap (parent at `i`, children at `2i+1`/`2i+2`), same shape as
/// `std::collections::BinaryHeap` internally, just keyed indirectly.
struct RunHeap {
    indices: Vec<usize>,
}

impl RunHeap {
    fn new() -> RunHeap {
        RunHeap { indices: Vec::new() }
    }

    fn push(&mut self, runs: &[SortRun], cmp: &Comparator, run_index: usize) {
        self.indices.push(run_index);
        let mut i = self.indices.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if less(runs, cmp, self.indices[i], self.indices[parent]) {
                self.indices.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn pop(&mut self, runs: &[SortRun], cmp: &Comparator) -> Option<usize> {
        if self.indices.is_empty() {
            return None;
        }
        let last = self.indices.len() - 1;
        self.indices.swap(0, last);
        let min = self.indices.pop().expect("just checked non-empty");

        let mut i = 0;
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut smallest = i;
            if left < self.indices.len() && less(runs, cmp, self.indices[left], self.indices[smallest]) {
                smallest = left;
            }
            if right < self.indices.len() && less(runs, cmp, self.indices[right], self.indices[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.indices.swap(i, smallest);
            i = smallest;
        }

        Some(min)
    }
}

/// Merges `runs` (each already sorted by `cmp`, over blocks sharing
/// `schema`) into freshly allocated output blocks, returning their ids in
/// no particular relation to the input ids. Every input run is closed
/// (unpinned and disowned) by the time this returns, whether it completed
/// normally or this returns early on error.
pub fn merge_sorted_runs<C: BlockCache>(
    cache: &mut C,
    schema: Arc<Schema>,
    mut runs: Vec<SortRun>,
    cmp: Rc<Comparator>,
) -> Result<Vec<BlockId>, Error> {
    let result = merge_runs(cache, schema, &mut runs, cmp.as_ref());

    for run in &mut runs {
        // `close` is idempotent; this only does work for runs that weren't
        // already drained, including any left pinned by an early error.
        let _ = run.close(cache);
    }

    result
}

fn merge_runs<C: BlockCache>(
    cache: &mut C,
    schema: Arc<Schema>,
    runs: &mut [SortRun],
    cmp: &Comparator,
) -> Result<Vec<BlockId>, Error> {
    let mut heap = RunHeap::new();
    for i in 0..runs.len() {
        if !runs[i].is_exhausted() {
            heap.push(runs, cmp, i);
        }
    }

    let mut output_ids = Vec::new();
    let mut current = cache.new_block(schema.clone());

    while let Some(run_index) = heap.pop(runs, cmp) {
        let literal = runs[run_index]
            .current_as_literal()
            .expect("heap entry implies the run still has a current tuple");

        if !current.insert(&literal)? {
            let full = std::mem::replace(&mut current, cache.new_block(schema.clone()));
            trace!("merge: output block {} full, starting a new one", full.id());
            output_ids.push(full.id());
            cache.unpin(full)?;
            let inserted = current.insert(&literal)?;
            debug_assert!(inserted, "a freshly allocated block must fit at least one tuple");
        }

        runs[run_index].advance();
        if runs[run_index].is_exhausted() {
            runs[run_index].close(cache)?;
        } else {
            heap.push(runs, cmp, run_index);
        }
    }

    output_ids.push(current.id());
    cache.unpin(current)?;
    Ok(output_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::cache::memory::InMemoryBlockCache;
    use crate::schema::{ColumnInfo, ColumnType, Schema};
    use crate::sort::block_sort::sort_block;
    use crate::value::{TupleLiteral, Value};

    fn by_int_column(a: &Block, ai: u32, b: &Block, bi: u32) -> std::cmp::Ordering {
        let av = match a.value_at(ai, 0) {
            Value::Integer(v) => v,
            _ => unreachable!(),
        };
        let bv = match b.value_at(bi, 0) {
            Value::Integer(v) => v,
            _ => unreachable!(),
        };
        av.cmp(&bv)
    }

    #[test]
    fn merges_several_sorted_blocks_into_global_order() {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut cache = InMemoryBlockCache::new(8);

        let groups: [&[i32]; 3] = [&[5, 1, 9], &[2, 8, 3], &[7, 4, 6, 0]];
        let mut ids = Vec::new();
        for group in &groups {
            let mut block = cache.new_block(schema.clone());
            for n in *group {
                let mut t = TupleLiteral::new();
                t.push(Value::Integer(*n));
                block.insert(&t).unwrap();
            }
            sort_block(&mut block, &by_int_column);
            ids.push(block.id());
            cache.unpin(block).unwrap();
        }

        let runs: Vec<SortRun> = ids.iter().map(|&id| SortRun::open(&mut cache, id).unwrap()).collect();
        let cmp: Rc<Comparator> = Rc::new(by_int_column);
        let output_ids = merge_sorted_runs(&mut cache, schema, runs, cmp).unwrap();

        let mut merged = Vec::new();
        for id in &output_ids {
            let block = cache.fetch(*id).unwrap();
            for i in 0..block.active_tuple_count() {
                match block.value_at(i, 0) {
                    Value::Integer(v) => merged.push(v),
                    _ => unreachable!(),
                }
            }
            cache.unpin(block).unwrap();
        }

        let mut expected: Vec<i32> = groups.iter().flat_map(|g| g.iter().copied()).collect();
        expected.sort();
        assert_eq!(merged, expected);

        // The merge must have disowned every input block, not just unpinned
        // it: none of the original ids should still be fetchable.
        for id in &ids {
            assert!(cache.fetch(*id).is_err());
        }
    }

    #[test]
    fn merging_zero_runs_produces_a_single_empty_output_block() {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut cache = InMemoryBlockCache::new(4);
        let cmp: Rc<Comparator> = Rc::new(by_int_column);

        let output_ids = merge_sorted_runs(&mut cache, schema, Vec::new(), cmp).unwrap();
        assert_eq!(output_ids.len(), 1);
        let block = cache.fetch(output_ids[0]).unwrap();
        assert_eq!(block.active_tuple_count(), 0);
    }
}
