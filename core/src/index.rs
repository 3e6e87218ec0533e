use std::collections::BTreeMap;

use crate::block::Block;

/// Ordered set of all currently-live heap blocks, keyed by base address.
///
/// Live ranges are pairwise non-overlapping, so a point lookup only ever has
/// to inspect the block with the greatest base at or below the address.
/// All operations are O(log n) in the number of live blocks.
///
/// No aggregation logic lives here; the index only owns the blocks.
#[derive(Debug, Default)]
pub struct BlockIndex {
    blocks: BTreeMap<u64, Block>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new live block.
    ///
    /// # Panics
    ///
    /// Panics if the block overlaps any block already in the index. An
    /// overlap means the allocation bookkeeping is already corrupt, and
    /// continuing would silently produce wrong numbers.
    pub fn insert(&mut self, block: Block) {
        if let Some((_, prev)) = self.blocks.range(..=block.base()).next_back() {
            assert!(
                prev.end() <= block.base(),
                "new block {:#x}+{} overlaps live block {:#x}+{}",
                block.base(),
                block.size(),
                prev.base(),
                prev.size(),
            );
        }
        if let Some((_, next)) = self.blocks.range(block.base()..).next() {
            assert!(
                block.end() <= next.base(),
                "new block {:#x}+{} overlaps live block {:#x}+{}",
                block.base(),
                block.size(),
                next.base(),
                next.size(),
            );
        }
        self.blocks.insert(block.base(), block);
    }

    /// Returns the live block whose range contains `addr`, if any.
    pub fn find_containing(&self, addr: u64) -> Option<&Block> {
        let (_, block) = self.blocks.range(..=addr).next_back()?;
        block.contains(addr).then_some(block)
    }

    pub fn find_containing_mut(&mut self, addr: u64) -> Option<&mut Block> {
        let (_, block) = self.blocks.range_mut(..=addr).next_back()?;
        block.contains(addr).then_some(block)
    }

    /// Removes and returns the block whose base equals `base`.
    ///
    /// # Panics
    ///
    /// Panics if no such block exists. Callers must have just confirmed
    /// presence; a miss here is a bookkeeping bug, not a bogus free.
    pub fn remove_exact(&mut self, base: u64) -> Block {
        match self.blocks.remove(&base) {
            Some(block) => block,
            None => panic!("no live block starts at {base:#x}"),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }
}
