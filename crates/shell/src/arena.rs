//! Session arena
//!
//! Bump allocator over chained fixed-capacity blocks. Every payload buffer of
//! the session lives here; nothing is freed individually and the whole arena
//! is torn down once, at session shutdown.
//!
//! Allocations are addressed by [`Region`] handles rather than references so
//! that the transfer log can hold them while the arena keeps growing.

use thiserror::Error;
use tracing::{debug, trace};

/// Default block capacity (192 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 0x30000;

/// Arena allocation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// Zero-byte requests are never served
    #[error("Cannot allocate an empty buffer")]
    ZeroSized,

    /// Request does not fit in a single block
    #[error("Cannot allocate {requested} bytes (block capacity is {capacity} bytes)")]
    TooLarge { requested: usize, capacity: usize },
}

/// Handle to a span of bytes owned by an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    block: usize,
    offset: usize,
    len: usize,
}

impl Region {
    /// A zero-length region that never touched the arena
    pub const EMPTY: Region = Region {
        block: 0,
        offset: 0,
        len: 0,
    };

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Same region, shortened to at most `len` bytes
    pub fn truncated(self, len: usize) -> Region {
        Region {
            len: self.len.min(len),
            ..self
        }
    }
}

struct Block {
    data: Box<[u8]>,
    used: usize,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.used
    }
}

/// Bump allocator over a chain of fixed-size blocks
pub struct Arena {
    block_size: usize,
    blocks: Vec<Block>,
    allocated: usize,
}

impl Arena {
    /// Create an empty arena; no block is allocated until the first request
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: Vec::new(),
            allocated: 0,
        }
    }

    /// Capacity of every block in this arena
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks chained so far
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Cumulative bytes served by successful allocations
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Bytes still available in the current (tail) block
    pub fn remaining_in_block(&self) -> usize {
        self.blocks.last().map_or(0, Block::remaining)
    }

    /// Allocate `size` zeroed bytes
    ///
    /// Served from the tail block when it has room, otherwise a new block is
    /// chained. Requests never span blocks.
    pub fn allocate(&mut self, size: usize) -> Result<Region, ArenaError> {
        if size == 0 {
            return Err(ArenaError::ZeroSized);
        }
        if size > self.block_size {
            return Err(ArenaError::TooLarge {
                requested: size,
                capacity: self.block_size,
            });
        }

        if self.remaining_in_block() < size {
            self.blocks.push(Block::new(self.block_size));
            debug!(
                "Chained arena block {} ({} bytes)",
                self.blocks.len() - 1,
                self.block_size
            );
        }

        let block = self.blocks.len() - 1;
        let tail = &mut self.blocks[block];
        let region = Region {
            block,
            offset: tail.used,
            len: size,
        };
        tail.used += size;
        self.allocated += size;

        trace!(
            "Allocated {} bytes at block {} offset {}",
            size, region.block, region.offset
        );
        Ok(region)
    }

    /// Allocate a region and fill it with `data`
    pub fn allocate_from(&mut self, data: &[u8]) -> Result<Region, ArenaError> {
        let region = self.allocate(data.len())?;
        self.bytes_mut(region).copy_from_slice(data);
        Ok(region)
    }

    /// Borrow the bytes of a region
    ///
    /// # Panics
    /// If the region was handed out before [`Arena::destroy_all`].
    pub fn bytes(&self, region: Region) -> &[u8] {
        if region.is_empty() {
            return &[];
        }
        &self.blocks[region.block].data[region.offset..region.offset + region.len]
    }

    /// Mutably borrow the bytes of a region
    pub fn bytes_mut(&mut self, region: Region) -> &mut [u8] {
        if region.is_empty() {
            return &mut [];
        }
        &mut self.blocks[region.block].data[region.offset..region.offset + region.len]
    }

    /// Release every block; all regions handed out so far become invalid
    pub fn destroy_all(&mut self) {
        debug!(
            "Releasing {} arena block(s), {} bytes served",
            self.blocks.len(),
            self.allocated
        );
        self.blocks.clear();
        self.allocated = 0;
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn served_bytes_equal_successful_requests(
            sizes in proptest::collection::vec(0usize..80, 1..64)
        ) {
            let mut arena = Arena::new(64);
            let mut expected = 0;
            for size in sizes {
                match arena.allocate(size) {
                    Ok(region) => {
                        prop_assert!(size > 0 && size <= 64);
                        prop_assert_eq!(region.len(), size);
                        expected += size;
                    }
                    Err(_) => prop_assert!(size == 0 || size > 64),
                }
            }
            prop_assert_eq!(arena.allocated_bytes(), expected);
            prop_assert!(arena.block_count() * 64 >= expected);
        }

        #[test]
        fn regions_never_overlap(sizes in proptest::collection::vec(1usize..=32, 1..32)) {
            let mut arena = Arena::new(32);
            let regions: Vec<Region> = sizes.iter().map(|s| arena.allocate(*s).unwrap()).collect();
            for (i, region) in regions.iter().enumerate() {
                arena.bytes_mut(*region).fill(i as u8);
            }
            for (i, region) in regions.iter().enumerate() {
                prop_assert!(arena.bytes(*region).iter().all(|b| *b == i as u8));
            }
        }
    }
}
