//! The block itself: a fixed-size, bidirectionally-growing tuple buffer.
//!
//! A [`Block`] packs fixed-length tuples upward from offset 0 and
//! variable-length ("non-inlined") objects downward from the top of its
//! `BLOCK_SIZE`-byte buffer. The two insertion points meet in the middle;
//! once they would cross, the block is full. This mirrors `nanodb`'s
//! `DBPage` slot-table allocator (`storage::dbpage`), except the growth is
//! two fixed rails rather than a slot directory plus a free-space rail.
//!
//! Eviction releases the backing buffer (`release_data`); reload hands back
//! a (possibly different) buffer at a different base address and relocates
//! every string ref accordingly (`set_data`). See the module-level comment
//! on [`Block::base_addr`] for how relocation is implemented without unsafe
//! pointer dereferences.

/// Random-access cursors over a block's tuples.
pub mod cursor;

use std::fmt;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, trace};

use crate::schema::{ColumnType, Schema};
use crate::value::{TupleSource, Value};

/// Fixed size of every block, in bytes: 8 MiB.
pub const BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// Opaque block identifier, assigned by whatever [`crate::cache::BlockCache`]
/// owns the block.
pub type BlockId = u64;

/// Errors produced by [`Block`]'s operations. Capacity refusal is not among
/// these — `insert` and `insert_relocating` report it as `Ok(false)`, since
/// running out of room in a block is an expected outcome, not a fault.
#[derive(Debug)]
pub enum Error {
    /// The operation requires the block's storage to be resident, but it has
    /// been evicted (`release_data` was called and `set_data` has not since
    /// restored it).
    NotResident,
    /// A tuple source's column count didn't match the block's schema.
    SchemaMismatch {
        tuple_columns: usize,
        schema_columns: usize,
    },
    /// A value's runtime type didn't match its column's declared type.
    TypeMismatch { column: usize },
    /// `copy_non_inlined` was called on a block whose non-inlined region is
    /// not empty; its precondition can only be satisfied once.
    NonInlinedRegionNotEmpty,
    /// `insert_relocating` was handed a byte slice that isn't exactly one
    /// schema-sized tuple.
    WrongTupleLength { expected: u16, got: usize },
    /// `set_data` was handed a buffer that isn't exactly `BLOCK_SIZE` bytes.
    WrongBufferSize { got: usize },
    /// `allocate` was asked for more bytes than the gap between the two
    /// insertion points actually holds. Callers (`insert`) are expected to
    /// check `gap()` first; this only fires on a caller bug.
    AllocationOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotResident => write!(f, "block is not resident"),
            Error::SchemaMismatch {
                tuple_columns,
                schema_columns,
            } => write!(
                f,
                "tuple has {} columns, schema has {}",
                tuple_columns, schema_columns
            ),
            Error::TypeMismatch { column } => {
                write!(f, "value for column {} doesn't match its column type", column)
            }
            Error::NonInlinedRegionNotEmpty => {
                write!(f, "destination block's non-inlined region is not empty")
            }
            Error::WrongTupleLength { expected, got } => write!(
                f,
                "raw tuple is {} bytes, schema tuple length is {}",
                got, expected
            ),
            Error::WrongBufferSize { got } => {
                write!(f, "buffer is {} bytes, expected BLOCK_SIZE ({})", got, BLOCK_SIZE)
            }
            Error::AllocationOverflow => write!(f, "not enough room to allocate from the non-inlined region"),
        }
    }
}

impl std::error::Error for Error {}

/// A fixed-size, self-contained buffer of packed tuples.
///
/// Tuples occupy `[0, tuple_insertion_point)`, growing up. Non-inlined
/// objects (currently: variable-length string data) occupy
/// `[non_inlined_insertion_point, BLOCK_SIZE)`, growing down. A block is
/// full once the gap between the two would be too small for the next
/// insert.
pub struct Block {
    id: BlockId,
    schema: Arc<Schema>,
    storage: Option<Vec<u8>>,
    tuple_insertion_point: u32,
    non_inlined_insertion_point: u32,
    active_tuple_count: u32,
    pinned: bool,
    stored: bool,
}

impl Block {
    /// Creates a new, empty, pinned, resident block. This is what a
    /// [`crate::cache::BlockCache`] hands back from `new_block`.
    pub fn new(id: BlockId, schema: Arc<Schema>) -> Block {
        Block {
            id,
            schema,
            storage: Some(vec![0u8; BLOCK_SIZE]),
            tuple_insertion_point: 0,
            non_inlined_insertion_point: BLOCK_SIZE as u32,
            active_tuple_count: 0,
            pinned: true,
            stored: false,
        }
    }

    /// Reconstructs a block's metadata without its storage, for a cache
    /// that is about to `set_data` a freshly-read buffer into it. The block
    /// starts unpinned and not resident; callers must `pin` it once
    /// `set_data` returns.
    pub(crate) fn from_persisted(
        id: BlockId,
        schema: Arc<Schema>,
        tuple_insertion_point: u32,
        non_inlined_insertion_point: u32,
        active_tuple_count: u32,
    ) -> Block {
        Block {
            id,
            schema,
            storage: None,
            tuple_insertion_point,
            non_inlined_insertion_point,
            active_tuple_count,
            pinned: false,
            stored: true,
        }
    }

    /// This block's identifier, as assigned by the cache that owns it.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The schema every tuple in this block is packed against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Whether the block is currently pinned against eviction.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// True once the block has been handed to a cache for persistence at
    /// least once (regardless of whether it's currently resident).
    pub fn is_stored(&self) -> bool {
        self.stored
    }

    /// Whether the block's storage buffer is currently in memory.
    pub fn is_resident(&self) -> bool {
        self.storage.is_some()
    }

    /// The number of tuples currently stored in the block.
    pub fn active_tuple_count(&self) -> u32 {
        self.active_tuple_count
    }

    /// Offset one past the last active tuple's inline bytes. Persisted
    /// across eviction; a cache needs it to reconstruct a [`Block`] with
    /// [`Block::from_persisted`].
    pub fn tuple_insertion_point(&self) -> u32 {
        self.tuple_insertion_point
    }

    /// Offset of the first byte of the non-inlined region. Persisted across
    /// eviction for the same reason as `tuple_insertion_point`.
    pub fn non_inlined_insertion_point(&self) -> u32 {
        self.non_inlined_insertion_point
    }

    /// Bytes free between the two insertion points. Defined even while the
    /// block is evicted, since both insertion points are metadata that
    /// survives eviction.
    pub fn gap(&self) -> u32 {
        self.non_inlined_insertion_point - self.tuple_insertion_point
    }

    fn require_resident(&self) -> Result<(), Error> {
        if self.storage.is_some() {
            Ok(())
        } else {
            Err(Error::NotResident)
        }
    }

    /// The current base address of this block's storage, as a plain integer
    /// derived from the backing `Vec<u8>`'s pointer. Never dereferenced as a
    /// pointer — only ever used in address arithmetic (`addr - base` to
    /// recover a local offset, `base + local_offset` to encode one). This
    /// is what lets string refs carry an absolute "address" through
    /// relocation while staying entirely within safe Rust.
    pub(crate) fn base_addr(&self) -> usize {
        self.storage.as_ref().expect("block is not resident").as_ptr() as usize
    }

    fn null_flag_byte_offset(&self, tuple_start: u32, col_index: usize) -> u32 {
        tuple_start + 1 + (col_index as u32 / 8)
    }

    fn set_null_flag(&mut self, tuple_start: u32, col_index: usize, value: bool) {
        let off = self.null_flag_byte_offset(tuple_start, col_index) as usize;
        let mask = 1u8 << (col_index % 8);
        let storage = self.storage.as_mut().unwrap();
        if value {
            storage[off] |= mask;
        } else {
            storage[off] &= !mask;
        }
    }

    fn is_null_bit(&self, tuple_start: u32, col_index: usize) -> bool {
        let off = self.null_flag_byte_offset(tuple_start, col_index) as usize;
        let mask = 1u8 << (col_index % 8);
        (self.storage.as_ref().unwrap()[off] & mask) != 0
    }

    /// Whether column `col_index` of the `tuple_idx`-th tuple is `NULL`.
    pub fn is_null(&self, tuple_idx: u32, col_index: usize) -> bool {
        let tuple_start = tuple_idx * self.schema.tuple_length() as u32;
        self.is_null_bit(tuple_start, col_index)
    }

    fn field_offset(&self, tuple_start: u32, col_index: usize) -> u32 {
        tuple_start + 1 + self.schema.null_flags_size() as u32 + self.schema.column_offset(col_index) as u32
    }

    fn write_string_ref(&mut self, field_offset: u32, local_offset: u32, len: u32) {
        let base = self.base_addr() as u64;
        let addr = base + local_offset as u64;
        let storage = self.storage.as_mut().unwrap();
        let off = field_offset as usize;
        BigEndian::write_u64(&mut storage[off..], addr);
        BigEndian::write_u32(&mut storage[off + 8..], len);
    }

    /// Reads a string ref, returning its local offset (relative to this
    /// block's own current base) and length.
    fn read_string_ref(&self, field_offset: u32) -> (u32, u32) {
        let storage = self.storage.as_ref().unwrap();
        let off = field_offset as usize;
        let addr = BigEndian::read_u64(&storage[off..]);
        let len = BigEndian::read_u32(&storage[off + 8..]);
        let base = self.base_addr() as u64;
        ((addr - base) as u32, len)
    }

    fn adjust_string_ref(&mut self, field_offset: u32, delta: i64) {
        let storage = self.storage.as_mut().unwrap();
        let off = field_offset as usize;
        let addr = BigEndian::read_u64(&storage[off..]);
        let new_addr = (addr as i64 + delta) as u64;
        BigEndian::write_u64(&mut storage[off..], new_addr);
    }

    fn write_field(storage: &mut [u8], offset: usize, column_type: &ColumnType, value: &Value) -> Result<(), ()> {
        match (column_type, value) {
            (ColumnType::TinyInt, Value::TinyInt(v)) => storage[offset] = *v as u8,
            (ColumnType::SmallInt, Value::SmallInt(v)) => BigEndian::write_i16(&mut storage[offset..], *v),
            (ColumnType::Integer, Value::Integer(v)) => BigEndian::write_i32(&mut storage[offset..], *v),
            (ColumnType::BigInt, Value::BigInt(v)) => BigEndian::write_i64(&mut storage[offset..], *v),
            (ColumnType::Float, Value::Float(v)) => BigEndian::write_f32(&mut storage[offset..], *v),
            (ColumnType::Double, Value::Double(v)) => BigEndian::write_f64(&mut storage[offset..], *v),
            (ColumnType::Char { length }, Value::Str(s)) => {
                let bytes = s.as_bytes();
                let width = *length as usize;
                let n = bytes.len().min(width);
                storage[offset..offset + n].copy_from_slice(&bytes[..n]);
                for b in &mut storage[offset + n..offset + width] {
                    *b = 0;
                }
            }
            _ => return Err(()),
        }
        Ok(())
    }

    fn read_field(storage: &[u8], offset: usize, column_type: &ColumnType) -> Value {
        match *column_type {
            ColumnType::TinyInt => Value::TinyInt(storage[offset] as i8),
            ColumnType::SmallInt => Value::SmallInt(BigEndian::read_i16(&storage[offset..])),
            ColumnType::Integer => Value::Integer(BigEndian::read_i32(&storage[offset..])),
            ColumnType::BigInt => Value::BigInt(BigEndian::read_i64(&storage[offset..])),
            ColumnType::Float => Value::Float(BigEndian::read_f32(&storage[offset..])),
            ColumnType::Double => Value::Double(BigEndian::read_f64(&storage[offset..])),
            ColumnType::Char { length } => {
                let raw = &storage[offset..offset + length as usize];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Value::Str(String::from_utf8_lossy(&raw[..end]).into_owned())
            }
            ColumnType::VarChar { .. } => unreachable!("varchar is read via its string ref, not read_field"),
        }
    }

    /// The value of column `col_index` of the `tuple_idx`-th tuple. Panics
    /// if the column is `NULL`; check [`Block::is_null`] first.
    pub fn value_at(&self, tuple_idx: u32, col_index: usize) -> Value {
        let tuple_start = tuple_idx * self.schema.tuple_length() as u32;
        let offset = self.field_offset(tuple_start, col_index);
        let column_type = self.schema.column(col_index).column_type;
        let storage = self.storage.as_ref().unwrap();
        if column_type.is_inline() {
            Block::read_field(storage, offset as usize, &column_type)
        } else {
            let (local_offset, len) = self.read_string_ref(offset);
            let bytes = &storage[local_offset as usize..(local_offset + len) as usize];
            Value::Str(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    /// The raw, schema-length inline bytes (status byte + null bitmap +
    /// fixed body) of the `tuple_idx`-th tuple, string refs included
    /// verbatim. Used by the sort driver's "alternative phase 1" to hand a
    /// tuple's inline body to another block's [`Block::insert_relocating`].
    pub fn raw_tuple(&self, tuple_idx: u32) -> &[u8] {
        let len = self.schema.tuple_length() as usize;
        let start = tuple_idx as usize * len;
        &self.storage.as_ref().unwrap()[start..start + len]
    }

    /// Mutable access to the same bytes as [`Block::raw_tuple`], for
    /// in-place swaps during sorting.
    pub fn raw_tuple_mut(&mut self, tuple_idx: u32) -> &mut [u8] {
        let len = self.schema.tuple_length() as usize;
        let start = tuple_idx as usize * len;
        &mut self.storage.as_mut().unwrap()[start..start + len]
    }

    /// Exchanges two tuples' raw inline bodies via a schema-sized scratch
    /// tuple (three memcpys). Non-inlined storage is untouched; a tuple's
    /// string refs move with it, still pointing at the same bytes.
    pub fn swap_tuples(&mut self, i: u32, j: u32) {
        if i == j {
            return;
        }
        let len = self.schema.tuple_length() as usize;
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        let lo_start = lo as usize * len;
        let hi_start = hi as usize * len;
        let storage = self.storage.as_mut().unwrap();
        let mut scratch = vec![0u8; len];
        scratch.copy_from_slice(&storage[lo_start..lo_start + len]);
        let (left, right) = storage.split_at_mut(hi_start);
        left[lo_start..lo_start + len].copy_from_slice(&right[..len]);
        right[..len].copy_from_slice(&scratch);
    }

    /// Allocates `n` bytes from the top of the non-inlined region, returning
    /// the local offset of the first allocated byte. Callers are expected
    /// to have already checked `gap() >= n`; `insert` always does.
    pub fn allocate(&mut self, n: u32) -> Result<u32, Error> {
        self.require_resident()?;
        if self.gap() < n {
            return Err(Error::AllocationOverflow);
        }
        self.non_inlined_insertion_point -= n;
        Ok(self.non_inlined_insertion_point)
    }

    /// Inserts a logical tuple, pulling its values from `tuple`. Returns
    /// `Ok(false)` if the block doesn't have room — not an error, callers
    /// are expected to try the next block.
    pub fn insert<T: TupleSource + ?Sized>(&mut self, tuple: &T) -> Result<bool, Error> {
        self.require_resident()?;
        let num_cols = self.schema.column_count();
        if tuple.column_count() != num_cols {
            return Err(Error::SchemaMismatch {
                tuple_columns: tuple.column_count(),
                schema_columns: num_cols,
            });
        }

        let mut values: Vec<Option<Value>> = Vec::with_capacity(num_cols);
        for i in 0..num_cols {
            values.push(if tuple.is_null(i) { None } else { Some(tuple.get(i)) });
        }

        let non_inline_indices: Vec<usize> = self.schema.non_inline_columns().map(|(idx, _)| idx).collect();

        let mut non_inlined_total: u32 = 0;
        for &idx in &non_inline_indices {
            if let Some(Value::Str(s)) = &values[idx] {
                non_inlined_total += s.len() as u32;
            }
        }

        let tuple_len = self.schema.tuple_length() as u32;
        if self.gap() < tuple_len + non_inlined_total {
            return Ok(false);
        }

        let mut non_inline_refs: Vec<(usize, u32, u32)> = Vec::new();
        for &idx in &non_inline_indices {
            if let Some(Value::Str(s)) = &values[idx] {
                let bytes = s.as_bytes();
                let local_offset = self.allocate(bytes.len() as u32)?;
                self.storage.as_mut().unwrap()[local_offset as usize..local_offset as usize + bytes.len()]
                    .copy_from_slice(bytes);
                non_inline_refs.push((idx, local_offset, bytes.len() as u32));
            }
        }

        let tuple_start = self.tuple_insertion_point;
        {
            let null_bytes = self.schema.null_flags_size() as usize;
            let storage = self.storage.as_mut().unwrap();
            storage[tuple_start as usize] = 0x01;
            let null_start = tuple_start as usize + 1;
            for b in &mut storage[null_start..null_start + null_bytes] {
                *b = 0;
            }
        }

        for i in 0..num_cols {
            match &values[i] {
                None => self.set_null_flag(tuple_start, i, true),
                Some(value) => {
                    let offset = self.field_offset(tuple_start, i);
                    let column_type = self.schema.column(i).column_type;
                    if column_type.is_inline() {
                        Block::write_field(self.storage.as_mut().unwrap(), offset as usize, &column_type, value)
                            .map_err(|_| Error::TypeMismatch { column: i })?;
                    } else {
                        let (_, local_offset, len) =
                            non_inline_refs.iter().find(|(ci, _, _)| *ci == i).expect("allocated above");
                        self.write_string_ref(offset, *local_offset, *len);
                    }
                }
            }
        }

        self.tuple_insertion_point += tuple_len;
        self.active_tuple_count += 1;
        trace!(
            "block {}: inserted tuple {} ({} bytes inline, {} bytes non-inlined)",
            self.id,
            self.active_tuple_count - 1,
            tuple_len,
            non_inlined_total
        );
        Ok(true)
    }

    /// Copies another block's entire non-inlined region verbatim into this
    /// block, byte for byte at the same offsets. This block's non-inlined
    /// region must be empty — the precondition can only be satisfied once,
    /// which is why this is only used by the sort driver's "alternative
    /// phase 1" against a single source block, never across a k-way merge
    /// of several sources.
    pub fn copy_non_inlined(&mut self, src: &Block) -> Result<(), Error> {
        self.require_resident()?;
        src.require_resident()?;
        if self.non_inlined_insertion_point != BLOCK_SIZE as u32 {
            return Err(Error::NonInlinedRegionNotEmpty);
        }
        let start = src.non_inlined_insertion_point as usize;
        let src_bytes = src.storage.as_ref().unwrap()[start..BLOCK_SIZE].to_vec();
        self.storage.as_mut().unwrap()[start..BLOCK_SIZE].copy_from_slice(&src_bytes);
        self.non_inlined_insertion_point = src.non_inlined_insertion_point;
        Ok(())
    }

    /// Copies a raw inline tuple body (as returned by [`Block::raw_tuple`])
    /// into this block, rewriting its string refs as though the source
    /// block's non-inlined region had already been copied here verbatim at
    /// the same offsets (via [`Block::copy_non_inlined`]). `source_base` is
    /// the source block's current `base_addr()` — the address its string
    /// refs are presently expressed against.
    pub fn insert_relocating(&mut self, raw_tuple: &[u8], source_base: usize) -> Result<bool, Error> {
        self.require_resident()?;
        let tuple_len = self.schema.tuple_length() as usize;
        if raw_tuple.len() != tuple_len {
            return Err(Error::WrongTupleLength {
                expected: tuple_len as u16,
                got: raw_tuple.len(),
            });
        }
        if self.gap() < tuple_len as u32 {
            return Ok(false);
        }

        let tuple_start = self.tuple_insertion_point;
        self.storage.as_mut().unwrap()[tuple_start as usize..tuple_start as usize + tuple_len]
            .copy_from_slice(raw_tuple);

        let delta = self.base_addr() as i64 - source_base as i64;
        if delta != 0 {
            for i in 0..self.schema.column_count() {
                if self.schema.column(i).column_type.is_inline() {
                    continue;
                }
                if self.is_null_bit(tuple_start, i) {
                    continue;
                }
                let offset = self.field_offset(tuple_start, i);
                self.adjust_string_ref(offset, delta);
                debug_assert!({
                    let (local_offset, len) = self.read_string_ref(offset);
                    (local_offset as usize) < BLOCK_SIZE && local_offset as usize + len as usize <= BLOCK_SIZE
                });
            }
        }

        self.tuple_insertion_point += tuple_len as u32;
        self.active_tuple_count += 1;
        Ok(true)
    }

    /// Relinquishes this block's storage so the cache can persist it
    /// elsewhere. Returns the buffer and the address it was based at, for
    /// later use as `orig_base` when calling `set_data`.
    pub fn release_data(&mut self) -> Result<(Vec<u8>, usize), Error> {
        let buf = self.storage.take().ok_or(Error::NotResident)?;
        let orig_base = buf.as_ptr() as usize;
        self.stored = true;
        debug!("block {}: released storage (was based at {:#x})", self.id, orig_base);
        Ok((buf, orig_base))
    }

    /// Hands this block a (possibly freshly-allocated) buffer to resume
    /// residency with, and relocates every string ref in every active tuple
    /// from `orig_base` to the new buffer's actual base address.
    pub fn set_data(&mut self, orig_base: usize, buf: Vec<u8>) -> Result<(), Error> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::WrongBufferSize { got: buf.len() });
        }
        self.storage = Some(buf);
        let new_base = self.base_addr();
        let delta = new_base as i64 - orig_base as i64;
        if delta != 0 {
            let tuple_len = self.schema.tuple_length() as u32;
            for t in 0..self.active_tuple_count {
                let tuple_start = t * tuple_len;
                for i in 0..self.schema.column_count() {
                    if self.schema.column(i).column_type.is_inline() {
                        continue;
                    }
                    if self.is_null_bit(tuple_start, i) {
                        continue;
                    }
                    let offset = self.field_offset(tuple_start, i);
                    self.adjust_string_ref(offset, delta);
                    debug_assert!({
                        let (local_offset, len) = self.read_string_ref(offset);
                        (local_offset as usize) < BLOCK_SIZE && local_offset as usize + len as usize <= BLOCK_SIZE
                    });
                }
            }
        }
        debug!(
            "block {}: set_data relocated {} tuples by delta {}",
            self.id, self.active_tuple_count, delta
        );
        Ok(())
    }

    /// Marks the block pinned, forbidding eviction until `unpin`. Pinning an
    /// already-pinned block is a programmer error.
    pub fn pin(&mut self) {
        assert!(!self.pinned, "double pin on block {}", self.id);
        self.pinned = true;
    }

    /// Clears the pin. Unpinning an already-unpinned block is a programmer
    /// error.
    pub fn unpin(&mut self) {
        assert!(self.pinned, "unpin on already-unpinned block {}", self.id);
        self.pinned = false;
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("resident", &self.is_resident())
            .field("pinned", &self.pinned)
            .field("stored", &self.stored)
            .field("active_tuple_count", &self.active_tuple_count)
            .field("gap", &self.gap())
            .finish()
    }
}
