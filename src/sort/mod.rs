//! Cache-aware external sort: per-block in-place sort followed by a k-way
//! merge, over blocks that may not all fit in memory at once.
//!
//! `nanodb` never needed an external sort — its query engine materializes
//! intermediate results through the planner's own row iterators. This
//! module is new, but follows the same collaborator-by-reference shape as
//! the rest of the crate: the driver takes a `&mut impl BlockCache` rather
//! than owning or assuming a particular cache implementation, and tears
//! down (unpins and disowns) every pinned run it's holding before
//! propagating any collaborator error, per the error-handling design's
//! taxonomy.

/// Per-block in-place introspective-quicksort-variant sort.
pub mod block_sort;
/// K-way merge of sorted runs.
pub mod merge;
/// A single sorted block being consumed during a merge.
pub mod run;

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::block::{Block, BlockId};
use crate::cache::BlockCache;
use crate::schema::Schema;
use run::SortRun;

/// A tuple comparator: orders two tuples, each identified by the block it
/// lives in and its index within that block, by their resolved column
/// values (as [`crate::block::Block::value_at`] would return them) —
/// never by a tuple's raw inline bytes, since a `VarChar` column's inline
/// bytes are an opaque string-ref address/length pair, not the referenced
/// text.
pub type Comparator = dyn Fn(&Block, u32, &Block, u32) -> std::cmp::Ordering;

/// Errors produced by the sort driver. Wraps both cache and block errors,
/// since the driver calls through both layers.
#[derive(Debug)]
pub enum Error {
    /// A block cache operation (fetch, unpin, eviction) failed.
    Cache(crate::cache::Error),
    /// A block-level operation (insert, relocate) failed.
    Block(crate::block::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Cache(e) => write!(f, "sort: {}", e),
            Error::Block(e) => write!(f, "sort: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::cache::Error> for Error {
    fn from(e: crate::cache::Error) -> Error {
        Error::Cache(e)
    }
}

impl From<crate::block::Error> for Error {
    fn from(e: crate::block::Error) -> Error {
        Error::Block(e)
    }
}

/// Sorts `input_blocks` (each fetched pinned, sorted in place, and handed
/// straight to the merge phase as a [`SortRun`] without an intervening
/// unpin/re-fetch round trip) and merges the result into fresh output
/// blocks built against `schema`. Per SPEC_FULL §4.4 Phase 1 step 1, each
/// input block is disowned from the cache once the sort driver has
/// finished reading its tuples out into a merge output block — handled by
/// [`SortRun::close`], which this driver relies on both on the success
/// path (via [`merge::merge_sorted_runs`]) and on error teardown below.
/// Never just unpinned: an unpinned-but-not-disowned input block would sit
/// in the cache indefinitely, never fetched again by anyone.
///
/// On any collaborator error, every block this driver is holding pinned at
/// that point is closed (unpinned and disowned) before the error is
/// returned.
pub fn external_sort<C: BlockCache>(
    cache: &mut C,
    schema: Arc<Schema>,
    input_blocks: &[BlockId],
    cmp: Rc<Comparator>,
) -> Result<Vec<BlockId>, Error> {
    let mut runs: Vec<SortRun> = Vec::with_capacity(input_blocks.len());
    for &id in input_blocks {
        match cache.fetch(id) {
            Ok(mut block) => {
                block_sort::sort_block(&mut block, cmp.as_ref());
                runs.push(SortRun::from_sorted_block(block));
            }
            Err(e) => {
                for run in &mut runs {
                    let _ = run.close(cache);
                }
                return Err(Error::from(e));
            }
        }
    }

    merge::merge_sorted_runs(cache, schema, runs, cmp)
}

/// An alternative way to sort one already-fetched block: instead of sorting
/// its tuples in place via [`block_sort::sort_block`]'s swap-based
/// quicksort, builds a handle vector over its tuple indices, sorts the
/// handles with a general-purpose comparison sort, then repacks into a
/// brand new block by copying the source's entire non-inlined region once
/// ([`crate::block::Block::copy_non_inlined`]) and re-inserting each tuple
/// in sorted order by its relocated raw bytes
/// ([`crate::block::Block::insert_relocating`]).
///
/// Exists to exercise the relocation path end to end and to check, in
/// tests, that it produces output equivalent to the in-place sort — not
/// because it's faster or otherwise preferable; `copy_non_inlined`'s
/// once-only precondition means this strategy only ever applies to a
/// single source block, never to a multi-block merge.
pub fn sort_block_via_repack<C: BlockCache>(
    cache: &mut C,
    src: &crate::block::Block,
    cmp: &Comparator,
) -> Result<crate::block::Block, Error> {
    let mut handles: Vec<u32> = (0..src.active_tuple_count()).collect();
    handles.sort_by(|&a, &b| cmp(src, a, src, b));

    let mut dst = cache.new_block(src.schema().clone());
    dst.copy_non_inlined(src)?;
    let source_base = src.base_addr();
    for idx in handles {
        let raw = src.raw_tuple(idx).to_vec();
        let inserted = dst.insert_relocating(&raw, source_base)?;
        debug_assert!(
            inserted,
            "repacked block has exactly the source's tuple count and identical layout"
        );
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryBlockCache;
    use crate::schema::{ColumnInfo, ColumnType, Schema};
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
    fn external_sort_over_many_blocks_produces_global_order() {
        let schema = Arc::new(Schema::new(vec![
            ColumnInfo::new("n", ColumnType::Integer),
            ColumnInfo::new("label", ColumnType::VarChar { max_length: 32 }),
        ]));
        let mut cache = InMemoryBlockCache::new(2);

        let mut ids = Vec::new();
        let mut all_values = Vec::new();
        for chunk in [[30, 10, 20], [60, 40, 50], [90, 70, 80], [25, 65, 5]] {
            let mut block = cache.new_block(schema.clone());
            for n in chunk {
                let mut t = TupleLiteral::new();
                t.push(Value::Integer(n));
                t.push(Value::Str(format!("v{}", n)));
                block.insert(&t).unwrap();
                all_values.push(n);
            }
            ids.push(block.id());
            cache.unpin(block).unwrap();
        }

        let cmp: Rc<Comparator> = Rc::new(by_int_column);
        let output_ids = external_sort(&mut cache, schema, &ids, cmp).unwrap();

        let mut merged = Vec::new();
        for id in &output_ids {
            let block = cache.fetch(*id).unwrap();
            for i in 0..block.active_tuple_count() {
                match block.value_at(i, 0) {
                    Value::Integer(v) => {
                        assert_eq!(block.value_at(i, 1), Value::Str(format!("v{}", v)));
                        merged.push(v);
                    }
                    _ => unreachable!(),
                }
            }
            cache.unpin(block).unwrap();
        }

        all_values.sort();
        assert_eq!(merged, all_values);

        // The sort must have disowned the original input blocks, per the
        // spec's Phase 1 step 1: "disown it from the input table and fetch
        // it (pinned)".
        for id in &ids {
            assert!(cache.fetch(*id).is_err());
        }
    }

    #[test]
    fn repack_sort_matches_in_place_sort() {
        let schema = Arc::new(Schema::new(vec![
            ColumnInfo::new("n", ColumnType::Integer),
            ColumnInfo::new("label", ColumnType::VarChar { max_length: 32 }),
        ]));

        let build = || {
            let mut block = crate::block::Block::new(1, schema.clone());
            for n in [8, 3, 5, 1, 9, 2, 7, 4, 6, 0] {
                let mut t = TupleLiteral::new();
                t.push(Value::Integer(n));
                t.push(Value::Str(format!("v{}", n)));
                block.insert(&t).unwrap();
            }
            block
        };

        let mut in_place = build();
        block_sort::sort_block(&mut in_place, &by_int_column);

        let source = build();
        let mut cache = InMemoryBlockCache::new(4);
        let repacked = sort_block_via_repack(&mut cache, &source, &by_int_column).unwrap();

        assert_eq!(in_place.active_tuple_count(), repacked.active_tuple_count());
        for i in 0..in_place.active_tuple_count() {
            assert_eq!(in_place.value_at(i, 0), repacked.value_at(i, 0));
            assert_eq!(in_place.value_at(i, 1), repacked.value_at(i, 1));
        }
    }
}
