//! Chunk planning and pack-block placement
//!
//! A file's bytes become a small inline preload prefix plus a run of chunks
//! of at most `max_chunk_size` bytes. The builder then places each stored
//! chunk into the current pack block through `BlockAllocator`, which opens a
//! new numbered block whenever the next chunk would overflow the current
//! one, so a chunk never straddles a block boundary.

use crate::directory::MAX_PACK_BLOCKS;
use crate::error::{Error, Result};

/// Default inline preload prefix, in bytes.
pub const DEFAULT_PRELOAD_CAP: usize = 1024;

/// Default maximum uncompressed chunk length.
pub const DEFAULT_MAX_CHUNK: usize = 1024 * 1024;

/// Default maximum pack-block file size.
pub const DEFAULT_MAX_BLOCK: u64 = 1024 * 1024 * 1024;

/// How one file's bytes split into preload and chunk spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Bytes kept inline in the directory.
    pub preload_len: usize,
    /// (offset, len) spans over the remainder, in file order.
    pub spans: Vec<(usize, usize)>,
}

/// Split `file_len` bytes into a preload prefix and chunk spans.
pub fn plan_chunks(file_len: usize, preload_cap: usize, max_chunk_size: usize) -> ChunkPlan {
    let preload_len = file_len.min(preload_cap);
    let mut spans = Vec::new();
    let mut offset = preload_len;
    while offset < file_len {
        let len = (file_len - offset).min(max_chunk_size);
        spans.push((offset, len));
        offset += len;
    }
    ChunkPlan { preload_len, spans }
}

/// Running (block index, byte offset) cursor assigning stored chunks to
/// numbered pack blocks. For patches the cursor starts past the base
/// archive's blocks so existing blocks are never rewritten.
#[derive(Debug)]
pub struct BlockAllocator {
    max_block_size: u64,
    current: u16,
    offset: u64,
    count: u16,
}

impl BlockAllocator {
    pub fn new(max_block_size: u64) -> Self {
        Self::starting_at(0, max_block_size)
    }

    pub fn starting_at(first_block: u16, max_block_size: u64) -> Self {
        BlockAllocator {
            max_block_size,
            current: first_block,
            offset: 0,
            count: first_block,
        }
    }

    /// Place `len` stored bytes, returning their (block index, offset).
    pub fn place(&mut self, len: u64) -> Result<(u16, u64)> {
        // A cursor starting past the last valid index (a patch over a full
        // base archive) must not mint a block the naming cannot express.
        if self.current >= MAX_PACK_BLOCKS {
            return Err(Error::BlockLimit(MAX_PACK_BLOCKS));
        }
        if self.offset > 0 && self.offset + len > self.max_block_size {
            if self.current + 1 >= MAX_PACK_BLOCKS {
                return Err(Error::BlockLimit(MAX_PACK_BLOCKS));
            }
            self.current += 1;
            self.offset = 0;
        }
        let placed = (self.current, self.offset);
        self.offset += len;
        self.count = self.count.max(self.current + 1);
        Ok(placed)
    }

    /// Number of blocks in use, counting any blocks the cursor started past.
    pub fn block_count(&self) -> u16 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_empty_file() {
        let plan = plan_chunks(0, 1024, 4096);
        assert_eq!(plan.preload_len, 0);
        assert!(plan.spans.is_empty());
    }

    #[test]
    fn test_plan_fits_in_preload() {
        let plan = plan_chunks(10, 1024, 4096);
        assert_eq!(plan.preload_len, 10);
        assert!(plan.spans.is_empty());
    }

    #[test]
    fn test_plan_splits_remainder() {
        let plan = plan_chunks(1024 + 4096 * 2 + 100, 1024, 4096);
        assert_eq!(plan.preload_len, 1024);
        assert_eq!(
            plan.spans,
            vec![(1024, 4096), (1024 + 4096, 4096), (1024 + 8192, 100)]
        );
    }

    #[test]
    fn test_plan_exact_multiple() {
        let plan = plan_chunks(1024 + 4096, 1024, 4096);
        assert_eq!(plan.spans, vec![(1024, 4096)]);
    }

    #[test]
    fn test_allocator_appends_until_full() {
        let mut alloc = BlockAllocator::new(100);
        assert_eq!(alloc.place(40).unwrap(), (0, 0));
        assert_eq!(alloc.place(40).unwrap(), (0, 40));
        // 80 + 40 > 100: rolls into a fresh block rather than straddling.
        assert_eq!(alloc.place(40).unwrap(), (1, 0));
        assert_eq!(alloc.block_count(), 2);
    }

    #[test]
    fn test_allocator_exactly_full_block() {
        let mut alloc = BlockAllocator::new(100);
        assert_eq!(alloc.place(100).unwrap(), (0, 0));
        assert_eq!(alloc.place(1).unwrap(), (1, 0));
    }

    #[test]
    fn test_allocator_starting_at() {
        let mut alloc = BlockAllocator::starting_at(3, 100);
        assert_eq!(alloc.block_count(), 3);
        assert_eq!(alloc.place(10).unwrap(), (3, 0));
        assert_eq!(alloc.block_count(), 4);
    }

    #[test]
    fn test_allocator_block_limit() {
        let mut alloc = BlockAllocator::starting_at(MAX_PACK_BLOCKS - 1, 10);
        alloc.place(10).unwrap();
        assert!(matches!(
            alloc.place(10),
            Err(Error::BlockLimit(MAX_PACK_BLOCKS))
        ));
    }

    #[test]
    fn test_allocator_full_base_archive() {
        // A patch cursor starting at the limit has no block left to assign.
        let mut alloc = BlockAllocator::starting_at(MAX_PACK_BLOCKS, 10);
        assert!(matches!(
            alloc.place(1),
            Err(Error::BlockLimit(MAX_PACK_BLOCKS))
        ));
        assert_eq!(alloc.block_count(), MAX_PACK_BLOCKS);
    }
}
