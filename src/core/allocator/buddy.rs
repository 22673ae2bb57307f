use super::memory::{Allocation, AllocationId, MIN_BLOCK_SIZE};
use super::AllocError;

use std::collections::{BTreeMap, VecDeque};
use log::*;

/// Free block addresses of a single order. Addresses are taken
/// from the front and returned to the back.
type FreeList = VecDeque<u64>;

/// Block handed out by the buddy allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuddyRecord {
    pub address: u64,
    pub size: u64,
}

/// Power-of-two allocator: every block of order `k` has a size
/// of `MIN_BLOCK_SIZE << k` and is aligned to that size.
pub struct BuddyAllocator {
    total_memory: u64,
    max_order: usize,
    /// One free list per order, from 0 to `max_order`. The
    /// vector is empty while the allocator is unusable.
    free_lists: Vec<FreeList>,
    /// Allocated blocks, indexed by identifier.
    allocations: BTreeMap<AllocationId, BuddyRecord>,
    id_counter: AllocationId,
}

impl BuddyAllocator {
    /// Unusable allocator, waiting for a successful `init`.
    pub fn new() -> Self {
        Self {
            total_memory: 0,
            max_order: 0,
            free_lists: Vec::new(),
            allocations: BTreeMap::new(),
            id_counter: 1,
        }
    }

    pub fn init(&mut self, total_memory: u64) -> Result<(), AllocError> {
        // Whatever happens next, the previous state is gone; a
        // rejected size leaves the allocator unusable rather
        // than serving from a stale address space.
        *self = Self::new();

        // Buddies are found by flipping the size bit of an
        // address, which only works if the whole space is a
        // single block of power-of-two size.
        if !total_memory.is_power_of_two() {
            warn!("Buddy allocator rejected {} bytes: not a power of two.", total_memory);
            return Err(AllocError::InvalidConfiguration {
                size: total_memory,
                reason: "buddy allocator requires memory size to be a power of two",
            });
        }
        if total_memory < MIN_BLOCK_SIZE {
            warn!("Buddy allocator rejected {} bytes: below the minimum block size.", total_memory);
            return Err(AllocError::InvalidConfiguration {
                size: total_memory,
                reason: "buddy allocator requires at least one minimum-sized block",
            });
        }

        // The highest order is the one whose single block spans
        // the entire memory: MIN_BLOCK_SIZE << max_order =
        // total_memory. Both are powers of two, so this is just
        // the difference of their logarithms.
        let max_order = (total_memory.ilog2() - MIN_BLOCK_SIZE.ilog2()) as usize;

        let mut free_lists = vec![FreeList::new(); max_order + 1];
        free_lists[max_order].push_back(0);

        self.total_memory = total_memory;
        self.max_order = max_order;
        self.free_lists = free_lists;

        info!("Buddy allocator initialized: {} bytes, max order {}.", total_memory, max_order);
        Ok(())
    }

    pub fn allocate(&mut self, size: u64) -> Result<Allocation, AllocError> {
        if self.free_lists.is_empty() {
            return Err(AllocError::Uninitialized);
        }

        // A request larger than the whole memory has no order
        // at all.
        let order = self.order_of(size)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        // Look for the smallest order, starting at the target
        // one, that has a free block.
        let found_order = (order..=self.max_order)
            .find(|&current| !self.free_lists[current].is_empty())
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        let address = self.free_lists[found_order]
            .pop_front()
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        // Split the block down to the target order: at each
        // step, the block keeps its lower half and the upper
        // half (its buddy at the smaller size) becomes free.
        for current in (order..found_order).rev() {
            let buddy = address + self.block_size(current);
            trace!("Split order {}: buddy 0x{:04x} freed.", current + 1, buddy);
            self.free_lists[current].push_back(buddy);
        }

        let id = self.id_counter;
        self.id_counter += 1;

        let size = self.block_size(order);
        self.allocations.insert(id, BuddyRecord { address, size });

        Ok(Allocation { id, address, size })
    }

    pub fn free(&mut self, id: AllocationId) -> Result<(), AllocError> {
        let BuddyRecord { mut address, size } = self.allocations
            .remove(&id)
            .ok_or(AllocError::InvalidIdentifier(id))?;

        // Records always hold exact block sizes, so the order
        // is known; the fallback is never taken.
        let mut order = self.order_of(size).unwrap_or(self.max_order);

        // Merge with the buddy as long as it is free, climbing
        // one order each time. The buddy of a block of size S
        // at address A is A ^ S: blocks are aligned to their
        // size, so flipping that bit toggles between the lower
        // and upper half of the parent block.
        while order < self.max_order {
            let buddy = address ^ self.block_size(order);

            let list = &mut self.free_lists[order];
            let Some(position) = list.iter().position(|&a| a == buddy) else {
                break;
            };
            list.remove(position);

            trace!("Merged 0x{:04x} with buddy 0x{:04x} (order {}).", address, buddy, order);
            address = address.min(buddy);
            order += 1;
        }

        self.free_lists[order].push_back(address);
        Ok(())
    }

    /// Smallest order whose block size is at least `size`, or
    /// `None` if even the largest order is too small.
    fn order_of(&self, size: u64) -> Option<usize> {
        let mut order = 0;
        let mut block = MIN_BLOCK_SIZE;

        while block < size {
            if order >= self.max_order {
                return None;
            }
            block <<= 1;
            order += 1;
        }

        Some(order)
    }

    fn block_size(&self, order: usize) -> u64 {
        MIN_BLOCK_SIZE << order
    }

    pub fn is_initialized(&self) -> bool {
        !self.free_lists.is_empty()
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Free lists with the block size of their order.
    pub fn free_lists(&self) -> impl Iterator<Item = (usize, u64, &FreeList)> + '_ {
        self.free_lists
            .iter()
            .enumerate()
            .map(move |(order, list)| (order, self.block_size(order), list))
    }

    pub fn allocations(&self) -> impl Iterator<Item = (AllocationId, BuddyRecord)> + '_ {
        self.allocations.iter().map(|(&id, &record)| (id, record))
    }

    pub fn used_memory(&self) -> u64 {
        self.allocations.values().map(|record| record.size).sum()
    }

    pub fn free_memory(&self) -> u64 {
        self.free_lists()
            .map(|(_, size, list)| size * list.len() as u64)
            .sum()
    }

    pub fn largest_free_block(&self) -> u64 {
        self.free_lists()
            .filter(|(_, _, list)| !list.is_empty())
            .map(|(_, size, _)| size)
            .max()
            .unwrap_or(0)
    }
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}
