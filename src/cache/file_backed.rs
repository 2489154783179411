//! A file-backed [`BlockCache`] adapter.
//!
//! Grounded directly in `nanodb::storage::file_manager::FileManager`'s
//! `save_page`/`load_page`: each persisted block occupies one fixed
//! `BLOCK_SIZE`-byte slot in a backing file, addressed by `slot * BLOCK_SIZE`
//! via `Seek` + `write_all`/`read_exact`, the same pattern `FileManager`
//! uses for its fixed-size database pages. Freed slots are reused via a
//! free list rather than ever truncating the file.
//!
//! On-disk persistence for 8 MiB blocks is outside this crate's goals
//! beyond exercising the [`BlockCache`] trait end to end — this adapter
//! exists to show the shape, not to be a tuned disk-backed topend.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use log::debug;

use super::{BlockCache, Error};
use crate::block::{Block, BlockId, BLOCK_SIZE};
use crate::schema::Schema;

struct PersistedSlot {
    slot: u64,
    orig_base: usize,
    schema: Arc<Schema>,
    tuple_insertion_point: u32,
    non_inlined_insertion_point: u32,
    active_tuple_count: u32,
}

/// A [`BlockCache`] that persists evicted blocks to fixed-size slots in a
/// backing file, rather than to an in-memory map.
pub struct FileBackedBlockCache {
    resident_budget: usize,
    next_id: BlockId,
    file: File,
    resident_unpinned: VecDeque<Block>,
    persisted: HashMap<BlockId, PersistedSlot>,
    free_slots: Vec<u64>,
    next_slot: u64,
}

impl FileBackedBlockCache {
    /// Builds a cache backed by `file`, which must be open for both reading
    /// and writing. The file's existing contents are ignored and will be
    /// overwritten as slots are allocated.
    pub fn new(resident_budget: usize, file: File) -> FileBackedBlockCache {
        FileBackedBlockCache {
            resident_budget,
            next_id: 0,
            file,
            resident_unpinned: VecDeque::new(),
            persisted: HashMap::new(),
            free_slots: Vec::new(),
            next_slot: 0,
        }
    }

    /// The number of blocks currently resident but unpinned.
    pub fn resident_unpinned_count(&self) -> usize {
        self.resident_unpinned.len()
    }

    /// The number of blocks currently evicted to the backing file.
    pub fn persisted_count(&self) -> usize {
        self.persisted.len()
    }

    fn allocate_slot(&mut self) -> u64 {
        if let Some(slot) = self.free_slots.pop() {
            slot
        } else {
            let slot = self.next_slot;
            self.next_slot += 1;
            slot
        }
    }

    fn write_slot(&mut self, slot: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(slot * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)
    }

    fn read_slot(&mut self, slot: u64) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(slot * BLOCK_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn evict_oldest(&mut self) -> Result<(), Error> {
        if let Some(mut victim) = self.resident_unpinned.pop_front() {
            let id = victim.id();
            let schema = victim.schema().clone();
            let tuple_insertion_point = victim.tuple_insertion_point();
            let non_inlined_insertion_point = victim.non_inlined_insertion_point();
            let active_tuple_count = victim.active_tuple_count();
            let (buf, orig_base) = victim.release_data()?;
            let slot = self.allocate_slot();
            self.write_slot(slot, &buf).map_err(|e| Error::Backend(e.to_string()))?;
            debug!("cache: wrote block {} to slot {}", id, slot);
            self.persisted.insert(
                id,
                PersistedSlot {
                    slot,
                    orig_base,
                    schema,
                    tuple_insertion_point,
                    non_inlined_insertion_point,
                    active_tuple_count,
                },
            );
        }
        Ok(())
    }
}

impl BlockCache for FileBackedBlockCache {
    fn new_block(&mut self, schema: Arc<Schema>) -> Block {
        let id = self.next_id;
        self.next_id += 1;
        Block::new(id, schema)
    }

    fn fetch(&mut self, id: BlockId) -> Result<Block, Error> {
        if let Some(pos) = self.resident_unpinned.iter().position(|b| b.id() == id) {
            let mut block = self.resident_unpinned.remove(pos).expect("position just found");
            block.pin();
            return Ok(block);
        }

        if let Some(persisted) = self.persisted.remove(&id) {
            let buf = self.read_slot(persisted.slot).map_err(|e| Error::Backend(e.to_string()))?;
            self.free_slots.push(persisted.slot);
            let mut block = Block::from_persisted(
                id,
                persisted.schema,
                persisted.tuple_insertion_point,
                persisted.non_inlined_insertion_point,
                persisted.active_tuple_count,
            );
            block.set_data(persisted.orig_base, buf)?;
            block.pin();
            debug!("cache: read block {} back from slot {}", id, persisted.slot);
            return Ok(block);
        }

        Err(Error::UnknownBlock(id))
    }

    fn unpin(&mut self, mut block: Block) -> Result<(), Error> {
        block.unpin();
        while self.resident_unpinned.len() >= self.resident_budget.max(1) {
            self.evict_oldest()?;
        }
        self.resident_unpinned.push_back(block);
        Ok(())
    }

    fn disown(&mut self, id: BlockId) -> Result<(), Error> {
        let mut found = false;
        if let Some(pos) = self.resident_unpinned.iter().position(|b| b.id() == id) {
            self.resident_unpinned.remove(pos);
            found = true;
        }
        if let Some(persisted) = self.persisted.remove(&id) {
            self.free_slots.push(persisted.slot);
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(Error::UnknownBlock(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, ColumnType};
    use crate::value::{TupleLiteral, Value};
    use tempdir::TempDir;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            ColumnInfo::new("id", ColumnType::Integer),
            ColumnInfo::new("name", ColumnType::VarChar { max_length: 255 }),
        ]))
    }

    fn scratch_file(dir: &TempDir) -> File {
        let path = dir.path().join("blocks.dat");
        File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .expect("create scratch file")
    }

    #[test]
    fn eviction_and_fetch_survive_an_actual_file_round_trip() {
        let dir = TempDir::new("blocktable-file-cache").unwrap();
        let file = scratch_file(&dir);
        let mut cache = FileBackedBlockCache::new(1, file);

        let mut block = cache.new_block(schema());
        let mut t = TupleLiteral::new();
        t.push(Value::Integer(123));
        t.push(Value::Str("on disk".to_string()));
        block.insert(&t).unwrap();
        let id = block.id();
        cache.unpin(block).unwrap();

        // force eviction by unpinning a second block against a budget of 1
        let second = cache.new_block(schema());
        cache.unpin(second).unwrap();
        assert_eq!(cache.persisted_count(), 1);

        let fetched = cache.fetch(id).unwrap();
        assert_eq!(fetched.value_at(0, 0), Value::Integer(123));
        assert_eq!(fetched.value_at(0, 1), Value::Str("on disk".to_string()));
    }

    #[test]
    fn disowning_a_persisted_block_frees_its_slot() {
        let dir = TempDir::new("blocktable-file-cache").unwrap();
        let file = scratch_file(&dir);
        let mut cache = FileBackedBlockCache::new(1, file);

        let a = cache.new_block(schema());
        let a_id = a.id();
        cache.unpin(a).unwrap();
        let b = cache.new_block(schema());
        cache.unpin(b).unwrap();
        assert_eq!(cache.persisted_count(), 1);
        assert!(cache.free_slots.is_empty());

        cache.disown(a_id).unwrap();
        assert_eq!(cache.persisted_count(), 0);
        assert_eq!(cache.free_slots.len(), 1);
    }
}
