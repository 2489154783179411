//! Random-access cursors over a block's tuples.
//!
//! `nanodb` never needed this — its pages are addressed by slot index, not
//! walked. The const/mutable split here instead follows the same shape as
//! the rest of the crate's ownership boundaries: [`BlockCursorMut`] holds an
//! exclusive borrow and can mutate tuples in place (for the sort driver's
//! in-block swaps); [`BlockCursor`] holds a shared borrow and is what every
//! read-only consumer (the merge driver, equality checks, tests) uses.
//! There's a one-way conversion from mutable to const (`as_const`) and none
//! the other way, mirroring a non-`const` iterator's relationship to its
//! `const` counterpart in other languages without the inheritance.

use super::Block;

/// A read-only, random-access cursor into a block's tuples.
///
/// Indices may run from `0` (inclusive) to `active_tuple_count()`
/// (exclusive, one-past-the-end, dereferencing it panics just like
/// indexing one past the end of a slice).
#[derive(Clone, Copy)]
pub struct BlockCursor<'b> {
    block: &'b Block,
    index: i64,
}

impl<'b> BlockCursor<'b> {
    /// A cursor at the block's first tuple.
    pub fn begin(block: &'b Block) -> BlockCursor<'b> {
        BlockCursor { block, index: 0 }
    }

    /// A cursor one past the block's last tuple.
    pub fn end(block: &'b Block) -> BlockCursor<'b> {
        BlockCursor {
            block,
            index: block.active_tuple_count() as i64,
        }
    }

    /// This cursor's current tuple index.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// The block this cursor points into.
    pub fn block(&self) -> &'b Block {
        self.block
    }

    /// The raw inline bytes of the tuple this cursor points at. Panics if
    /// the cursor is out of `[0, active_tuple_count())`.
    pub fn get(&self) -> &'b [u8] {
        self.block.raw_tuple(self.index as u32)
    }

    /// Moves the cursor one tuple forward.
    pub fn advance(&mut self) {
        self.index += 1;
    }

    /// Moves the cursor one tuple backward.
    pub fn retreat(&mut self) {
        self.index -= 1;
    }

    fn assert_same_block(&self, other: &BlockCursor<'_>) {
        debug_assert!(
            std::ptr::eq(self.block, other.block),
            "comparing cursors into different blocks"
        );
    }
}

impl<'b> PartialEq for BlockCursor<'b> {
    fn eq(&self, other: &Self) -> bool {
        self.assert_same_block(other);
        self.index == other.index
    }
}

impl<'b> Eq for BlockCursor<'b> {}

impl<'b> PartialOrd for BlockCursor<'b> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'b> Ord for BlockCursor<'b> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.assert_same_block(other);
        self.index.cmp(&other.index)
    }
}

impl<'b> std::ops::Add<i64> for BlockCursor<'b> {
    type Output = BlockCursor<'b>;
    fn add(self, rhs: i64) -> BlockCursor<'b> {
        BlockCursor {
            block: self.block,
            index: self.index + rhs,
        }
    }
}

impl<'b> std::ops::Sub<i64> for BlockCursor<'b> {
    type Output = BlockCursor<'b>;
    fn sub(self, rhs: i64) -> BlockCursor<'b> {
        BlockCursor {
            block: self.block,
            index: self.index - rhs,
        }
    }
}

impl<'b> std::ops::Sub<BlockCursor<'b>> for BlockCursor<'b> {
    type Output = i64;
    fn sub(self, rhs: BlockCursor<'b>) -> i64 {
        self.assert_same_block(&rhs);
        self.index - rhs.index
    }
}

impl<'b> std::ops::Index<i64> for BlockCursor<'b> {
    type Output = [u8];
    fn index(&self, n: i64) -> &[u8] {
        self.block.raw_tuple((self.index + n) as u32)
    }
}

impl<'b> Iterator for BlockCursor<'b> {
    type Item = &'b [u8];

    fn next(&mut self) -> Option<&'b [u8]> {
        if self.index < self.block.active_tuple_count() as i64 {
            let tuple = self.get();
            self.index += 1;
            Some(tuple)
        } else {
            None
        }
    }
}

/// A mutable, random-access cursor into a block's tuples.
///
/// Not `Copy` — it holds an exclusive borrow. Arithmetic operators therefore
/// consume `self` and return a new cursor, rather than the `Copy`-friendly
/// by-value style [`BlockCursor`] uses.
pub struct BlockCursorMut<'b> {
    block: &'b mut Block,
    index: i64,
}

impl<'b> BlockCursorMut<'b> {
    /// A cursor at the block's first tuple.
    pub fn begin(block: &'b mut Block) -> BlockCursorMut<'b> {
        let index = 0;
        BlockCursorMut { block, index }
    }

    /// A cursor one past the block's last tuple.
    pub fn end(block: &'b mut Block) -> BlockCursorMut<'b> {
        let index = block.active_tuple_count() as i64;
        BlockCursorMut { block, index }
    }

    /// This cursor's current tuple index.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// The raw inline bytes of the tuple this cursor points at.
    pub fn get(&self) -> &[u8] {
        self.block.raw_tuple(self.index as u32)
    }

    /// Mutable access to the same bytes as [`BlockCursorMut::get`].
    pub fn get_mut(&mut self) -> &mut [u8] {
        self.block.raw_tuple_mut(self.index as u32)
    }

    /// Moves the cursor one tuple forward.
    pub fn advance(&mut self) {
        self.index += 1;
    }

    /// Moves the cursor one tuple backward.
    pub fn retreat(&mut self) {
        self.index -= 1;
    }

    /// Swaps the tuple this cursor points at with the tuple at `other`,
    /// within the same block.
    pub fn swap_with(&mut self, other: i64) {
        let i = self.index as u32;
        self.block.swap_tuples(i, other as u32);
    }

    /// A read-only view of this cursor's current position. The one-way
    /// conversion from mutable to const cursor the module docs describe.
    pub fn as_const(&self) -> BlockCursor<'_> {
        BlockCursor {
            block: self.block,
            index: self.index,
        }
    }
}

impl<'b> std::ops::Add<i64> for BlockCursorMut<'b> {
    type Output = BlockCursorMut<'b>;
    fn add(self, rhs: i64) -> BlockCursorMut<'b> {
        BlockCursorMut {
            block: self.block,
            index: self.index + rhs,
        }
    }
}

impl<'b> std::ops::Sub<i64> for BlockCursorMut<'b> {
    type Output = BlockCursorMut<'b>;
    fn sub(self, rhs: i64) -> BlockCursorMut<'b> {
        BlockCursorMut {
            block: self.block,
            index: self.index - rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, ColumnType, Schema};
    use crate::value::{TupleLiteral, Value};
    use byteorder::{BigEndian, ByteOrder};
    use std::sync::Arc;

    fn filled_block() -> Block {
        let schema = Arc::new(Schema::new(vec![ColumnInfo::new("n", ColumnType::Integer)]));
        let mut block = Block::new(1, schema);
        for n in 0..5 {
            let mut t = TupleLiteral::new();
            t.push(Value::Integer(n));
            block.insert(&t).unwrap();
        }
        block
    }

    #[test]
    fn begin_to_end_walks_every_tuple_in_order() {
        let block = filled_block();
        // status byte + 1-byte null bitmap precede the inline `Integer` field.
        let values: Vec<i32> = BlockCursor::begin(&block)
            .map(|raw| BigEndian::read_i32(&raw[2..]))
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cursor_arithmetic_matches_index_difference() {
        let block = filled_block();
        let begin = BlockCursor::begin(&block);
        let end = BlockCursor::end(&block);
        assert_eq!(end - begin, 5);
        assert_eq!((begin + 3).index(), 3);
        assert_eq!((end - 2).index(), 3);
    }

    #[test]
    fn cursor_ordering_follows_index() {
        let block = filled_block();
        let begin = BlockCursor::begin(&block);
        let third = begin + 2;
        assert!(begin < third);
        assert_eq!(begin, BlockCursor::begin(&block));
    }

    #[test]
    fn indexing_reads_the_offset_tuple() {
        let block = filled_block();
        let cursor = BlockCursor::begin(&block) + 1;
        assert_eq!(cursor[1].len(), block.raw_tuple(2).len());
    }

    #[test]
    fn mutable_cursor_swap_is_reflected_through_const_view() {
        let mut block = filled_block();
        {
            let mut cursor = BlockCursorMut::begin(&mut block);
            cursor.swap_with(4);
        }
        assert_eq!(block.value_at(0, 0), Value::Integer(4));
        assert_eq!(block.value_at(4, 0), Value::Integer(0));
    }
}
