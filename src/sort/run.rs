//! A single sort run: one pinned, sorted block being consumed in order
//! during a k-way merge.
//!
//! Grounded in the Design Notes' "priority queue of sort runs → each run
//! owns a ref-count on a one-block table + pinned iterator, releases on
//! exhaustion": a `SortRun` owns exactly one pin on its block (via whichever
//! [`BlockCache`] produced it) for as long as it has tuples left to offer,
//! and returns that pin the moment it's drained. Its position is tracked
//! via a [`BlockCursor`] rather than a bare index, so walking a run shares
//! the same bounds-checked, random-access cursor the rest of the crate
//! presents over a block's tuples.

use crate::block::cursor::BlockCursor;
use crate::block::{Block, BlockId};
use crate::cache::BlockCache;
use crate::value::TupleLiteral;

use super::Error;

/// One sorted block being walked tuple-by-tuple during a merge.
pub struct SortRun {
    block: Option<Block>,
    position: i64,
}

impl SortRun {
    /// Fetches (pinning) `block_id` from `cache` and positions the run at
    /// its first tuple. The block is assumed already sorted.
    pub fn open<C: BlockCache>(cache: &mut C, block_id: BlockId) -> Result<SortRun, Error> {
        let block = cache.fetch(block_id)?;
        Ok(SortRun::from_sorted_block(block))
    }

    /// Wraps an already-fetched, already-sorted block as a run without a
    /// further cache round trip. `external_sort` uses this to hand a
    /// freshly sorted, still-pinned block straight to the merge phase,
    /// rather than unpinning it back to the cache only to re-fetch it by
    /// id a moment later.
    pub fn from_sorted_block(block: Block) -> SortRun {
        SortRun {
            block: Some(block),
            position: 0,
        }
    }

    /// The id of the block this run is walking, if its pin hasn't been
    /// released yet.
    pub fn block_id(&self) -> Option<BlockId> {
        self.block.as_ref().map(Block::id)
    }

    /// The block and tuple index this run currently points at, for use as
    /// a merge comparator key resolved through [`Block::value_at`] rather
    /// than the tuple's raw inline bytes. `None` once the run is exhausted
    /// or closed.
    pub fn current(&self) -> Option<(&Block, u32)> {
        let block = self.block.as_ref()?;
        let cursor = BlockCursor::begin(block) + self.position;
        if cursor < BlockCursor::end(block) {
            Some((block, cursor.index() as u32))
        } else {
            None
        }
    }

    /// Whether the run has no more tuples to offer.
    pub fn is_exhausted(&self) -> bool {
        self.current().is_none()
    }

    /// A fully-decoded, owned copy of the tuple this run currently points
    /// at, suitable for [`crate::block::Block::insert`] into a different
    /// block (which allocates its own non-inlined storage for any
    /// out-of-line columns, rather than assuming a shared non-inlined
    /// region the way [`crate::block::Block::insert_relocating`] does).
    pub fn current_as_literal(&self) -> Option<TupleLiteral> {
        let (block, idx) = self.current()?;
        let mut literal = TupleLiteral::new();
        for col in 0..block.schema().column_count() {
            if block.is_null(idx, col) {
                literal.push_null();
            } else {
                literal.push(block.value_at(idx, col));
            }
        }
        Some(literal)
    }

    /// Moves to the next tuple in the run.
    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// Releases this run's block for good: unpins it back to `cache` and
    /// immediately disowns it. Once a run is exhausted every one of its
    /// tuples has already been copied into the merge's output blocks, so
    /// the original has no further reason to occupy cache or disk
    /// capacity — unlike a plain `unpin`, which would leave it sitting
    /// around indefinitely as a reusable, never-again-referenced block.
    /// Safe to call more than once; a no-op after the first call.
    pub fn close<C: BlockCache>(&mut self, cache: &mut C) -> Result<(), Error> {
        if let Some(block) = self.block.take() {
            let id = block.id();
            cache.unpin(block)?;
            cache.disown(id)?;
        }
        Ok(())
    }
}
