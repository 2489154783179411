#![deny(missing_docs)]
//! A large temporary-table block engine: fixed-size, bidirectionally-growing
//! tuple blocks, a pin/evict block cache, and a cache-aware external sort
//! over blocks that may not all fit in memory at once.
//!
//! The four collaborating pieces are [`schema`] (tuple shape descriptors),
//! [`value`] (the logical value/tuple-source layer `Block::insert` reads
//! from), [`block`] (the block itself, its iterator cursors, and relocation
//! machinery), [`cache`] (the pin/evict/fetch contract plus two reference
//! implementations), and [`sort`] (per-block sort and k-way merge).

pub mod block;
pub mod cache;
pub mod schema;
pub mod sort;
pub mod value;

pub use block::{Block, BlockId, BLOCK_SIZE};
pub use cache::BlockCache;
pub use schema::{ColumnInfo, ColumnType, Schema};
pub use value::{TupleLiteral, TupleSource, Value};
