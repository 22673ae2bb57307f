use super::memory::{align_up, Allocation, AllocationId, BlockView, ALIGNMENT};
use super::AllocError;

use std::collections::HashMap;
use log::*;

/// Key of a block within the block list. Slots are internal
/// bookkeeping and have nothing to do with allocation
/// identifiers: a slot outlives any number of allocations.
type SlotId = u64;

/// Placement policy used to pick a free block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fit {
    /// First free block, in address order, that is large
    /// enough.
    First,
    /// Free block leaving the smallest remainder.
    Best,
    /// Largest free block.
    Worst,
}

/// Contiguous byte range of the address space.
struct Block {
    start: u64,
    size: u64,
    owner: Option<AllocationId>,
    next: Option<SlotId>,
}

/// Linear allocator keeping the whole address space as a
/// linked sequence of blocks, ordered by address.
pub struct BlockList {
    total_memory: u64,
    blocks: HashMap<SlotId, Block>,
    /// The first block always starts at address 0 and is never
    /// merged away (merges only remove the right-hand block),
    /// so its slot stays the same for a whole epoch.
    head: Option<SlotId>,
    slot_counter: SlotId,
    id_counter: AllocationId,
    failures: u64,
    internal_fragmentation: u64,
}

impl BlockList {
    pub fn new(total_memory: u64) -> Self {
        let mut list = Self {
            total_memory: 0,
            blocks: HashMap::new(),
            head: None,
            slot_counter: 0,
            id_counter: 1,
            failures: 0,
            internal_fragmentation: 0,
        };
        list.init(total_memory);
        list
    }

    pub fn init(&mut self, total_memory: u64) {
        self.total_memory = total_memory;
        self.blocks.clear();
        self.head = None;
        self.slot_counter = 0;
        self.id_counter = 1;
        self.failures = 0;
        self.internal_fragmentation = 0;

        // Initialize with a single free block that covers the
        // whole address space. An empty address space has no
        // blocks at all, so every request fails.
        if total_memory > 0 {
            let slot = self.next_slot();
            self.blocks.insert(
                slot, Block {
                    start: 0,
                    size: total_memory,
                    owner: None,
                    next: None,
                }
            );
            self.head = Some(slot);
        }
    }

    pub fn allocate(&mut self, size: u64, fit: Fit) -> Result<Allocation, AllocError> {
        // The request is rounded up to the alignment first, and
        // the padding is recorded as internal fragmentation
        // whether or not a block is found afterwards.
        let aligned_size = match align_up(size, ALIGNMENT) {
            Some(aligned) if aligned > 0 => aligned,
            _ => {
                self.failures += 1;
                return Err(AllocError::OutOfMemory { requested: size });
            }
        };
        self.internal_fragmentation += aligned_size - size;

        let slot = match self.find_free_block(aligned_size, fit) {
            Some(slot) => slot,
            None => {
                self.failures += 1;
                debug!("No free block of {} bytes ({:?} fit).", aligned_size, fit);
                return Err(AllocError::OutOfMemory { requested: size });
            }
        };

        // If the block is larger than the aligned size, split
        // it in two parts: the block itself shrinks to the
        // aligned size, and the remaining space becomes a new
        // free block inserted right after it.
        let block = &self.blocks[&slot];
        if block.size > aligned_size {
            let remainder = Block {
                start: block.start + aligned_size,
                size: block.size - aligned_size,
                owner: None,
                next: block.next,
            };
            let remainder_slot = self.next_slot();

            trace!(
                "Split block at 0x{:04x}: {} + {} bytes.",
                remainder.start - aligned_size,
                aligned_size,
                remainder.size,
            );
            self.blocks.insert(remainder_slot, remainder);

            if let Some(block) = self.blocks.get_mut(&slot) {
                block.size = aligned_size;
                block.next = Some(remainder_slot);
            }
        }

        // In both cases the block now has exactly the aligned
        // size; mark it as used by a fresh identifier.
        let id = self.id_counter;
        self.id_counter += 1;

        let block = self.blocks
            .get_mut(&slot)
            .ok_or(AllocError::OutOfMemory { requested: size })?;
        block.owner = Some(id);

        Ok(Allocation {
            id,
            address: block.start,
            size: aligned_size,
        })
    }

    pub fn free(&mut self, id: AllocationId) -> Result<(), AllocError> {
        let block = self.blocks
            .values_mut()
            .find(|block| block.owner == Some(id))
            .ok_or(AllocError::InvalidIdentifier(id))?;

        block.owner = None;
        self.coalesce();
        Ok(())
    }

    /// Merge every run of adjacent free blocks into a single
    /// block, in one pass over the list.
    pub fn coalesce(&mut self) {
        let mut current = self.head;

        while let Some(slot) = current {
            let (free, next) = {
                let block = &self.blocks[&slot];
                (block.owner.is_none(), block.next)
            };

            match next {
                Some(next_slot) if free && self.blocks[&next_slot].owner.is_none() => {
                    // Do not advance: the merged block may
                    // still be followed by another free one.
                    self.merge_blocks(slot, next_slot);
                }
                _ => current = next,
            }
        }
    }

    fn merge_blocks(&mut self, block_l: SlotId, block_r: SlotId) {
        // Remove the right block from the list, since it will
        // be absorbed by the left one.
        let Some(right) = self.blocks.remove(&block_r) else {
            return;
        };

        // Grow the left block and update its `next` pointer.
        if let Some(left) = self.blocks.get_mut(&block_l) {
            trace!(
                "Merged free blocks at 0x{:04x} and 0x{:04x}.",
                left.start,
                right.start,
            );
            left.size += right.size;
            left.next = right.next;
        }
    }

    fn find_free_block(&self, size: u64, fit: Fit) -> Option<SlotId> {
        let mut candidates = self.iter_slots()
            .filter(|(_, block)| block.owner.is_none() && block.size >= size);

        let found = match fit {
            Fit::First => candidates.next(),
            // `min_by_key` keeps the first of several equal
            // minima, which is the tie-break we want.
            Fit::Best => candidates.min_by_key(|(_, block)| block.size - size),
            // `max_by_key` would keep the last maximum, so the
            // first one is selected by hand.
            Fit::Worst => candidates.reduce(|worst, candidate| {
                if candidate.1.size > worst.1.size { candidate } else { worst }
            }),
        };

        found.map(|(slot, _)| slot)
    }

    fn iter_slots(&self) -> impl Iterator<Item = (SlotId, &Block)> + '_ {
        std::iter::successors(
            self.head.map(|slot| (slot, &self.blocks[&slot])),
            move |(_, block)| block.next.map(|slot| (slot, &self.blocks[&slot])),
        )
    }

    fn next_slot(&mut self) -> SlotId {
        let slot = self.slot_counter;
        self.slot_counter += 1;
        slot
    }

    /// Blocks in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.iter_slots().map(|(_, block)| BlockView {
            start: block.start,
            size: block.size,
            owner: block.owner,
        })
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    pub fn used_memory(&self) -> u64 {
        self.blocks().filter(|b| !b.is_free()).map(|b| b.size).sum()
    }

    pub fn free_memory(&self) -> u64 {
        self.blocks().filter(BlockView::is_free).map(|b| b.size).sum()
    }

    pub fn largest_free_block(&self) -> u64 {
        self.blocks()
            .filter(BlockView::is_free)
            .map(|b| b.size)
            .max()
            .unwrap_or(0)
    }

    /// Number of requests this engine could not serve since
    /// the last `init`.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Bytes lost to alignment padding since the last `init`.
    pub fn internal_fragmentation(&self) -> u64 {
        self.internal_fragmentation
    }
}
