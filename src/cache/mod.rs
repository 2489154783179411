//! The block cache / topend interface.
//!
//! This module specifies only the *contract* a temp-table's block cache
//! must satisfy — `new_block`, `fetch`, `unpin`, `disown` — the way the
//! original component is an external collaborator to the block engine.
//! [`memory::InMemoryBlockCache`] is the one concrete implementation this
//! crate ships, grounded in `nanodb::storage::file_manager::FileManager` +
//! `storage_manager::load_dbpage`'s fetch-pins-and-loads pattern, standing
//! in for an actual topend so the crate can compile and test standalone.

/// A [`BlockCache`] backed by a fixed-slot file.
pub mod file_backed;
/// A [`BlockCache`] backed by an in-memory map.
pub mod memory;

use std::fmt;
use std::sync::Arc;

use crate::block::{Block, BlockId};
use crate::schema::Schema;

/// Errors a [`BlockCache`] implementation can report. Distinct from
/// [`crate::block::Error`]: these are collaborator failures (a missing id,
/// a backing-store I/O error), not block-level programmer errors.
#[derive(Debug)]
pub enum Error {
    /// `fetch` or `unpin` was given an id the cache has never seen, or one
    /// whose block has since been `disown`ed.
    UnknownBlock(BlockId),
    /// The cache's persistence layer failed (e.g. an I/O error performing
    /// an actual write/read against a file-backed adapter).
    Backend(String),
    /// The block-level operation itself failed while the cache was
    /// transparently relocating or manipulating it (e.g. `set_data` saw a
    /// mismatched buffer size).
    Block(crate::block::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownBlock(id) => write!(f, "no resident or persisted block with id {}", id),
            Error::Backend(msg) => write!(f, "cache backend error: {}", msg),
            Error::Block(e) => write!(f, "block error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::block::Error> for Error {
    fn from(e: crate::block::Error) -> Error {
        Error::Block(e)
    }
}

/// A cache owns a collection of blocks, manages their pin state, and is
/// responsible for evicting unpinned blocks under memory pressure by
/// persisting them (`release_data`) and later reloading them (`set_data`)
/// — possibly at a different base address — on `fetch`. A single cache
/// instance may back blocks of more than one schema over its lifetime:
/// each block carries its own schema (per §6's persisted-metadata "schema
/// identifier"), so the schema is supplied at allocation time, not bound
/// once for the whole cache.
///
/// Block size and eviction budget are constructor parameters on each
/// implementation, never globals: a cache is a collaborator passed by
/// reference, not a process-wide singleton.
pub trait BlockCache {
    /// Allocates a new, empty, pinned block against `schema`.
    fn new_block(&mut self, schema: Arc<Schema>) -> Block;

    /// Returns the pinned, resident block for `id`, reloading it from the
    /// backing store (and relocating its string refs via `set_data`) if it
    /// had been evicted.
    fn fetch(&mut self, id: BlockId) -> Result<Block, Error>;

    /// Unpins a block, handing it back to the cache. The cache may persist
    /// it immediately or defer; either way, it may now be evicted to make
    /// room for future `fetch`/`new_block` calls. Consumes `block` by
    /// value: once unpinned, callers no longer hold a usable handle and
    /// must `fetch` again to get one back.
    fn unpin(&mut self, block: Block) -> Result<(), Error>;

    /// Permanently removes a block and any persisted copy of it. Called
    /// once a temp table drops its last reference to the block.
    fn disown(&mut self, id: BlockId) -> Result<(), Error>;
}
