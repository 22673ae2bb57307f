mod block_list;
mod buddy;
mod memory;
mod stats;

pub use block_list::{BlockList, Fit};
pub use buddy::{BuddyAllocator, BuddyRecord};
pub use memory::{align_up, Allocation, AllocationId, BlockView, ALIGNMENT, MIN_BLOCK_SIZE};
pub use stats::{MemoryDump, Stats};

use std::{fmt, str::FromStr};
use thiserror::Error;
use log::*;

/// Errors reported by the allocation engines. None of them is
/// fatal: the state of the engine is left consistent and the
/// next request is served normally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("out of memory: no free block for a request of {requested} bytes")]
    OutOfMemory { requested: u64 },
    #[error("invalid block id {0}")]
    InvalidIdentifier(AllocationId),
    #[error("invalid memory size {size}: {reason}")]
    InvalidConfiguration { size: u64, reason: &'static str },
    #[error("memory is not initialized")]
    Uninitialized,
}

/// Allocation strategy used by the memory manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    FirstFit,
    BestFit,
    WorstFit,
    Buddy,
}

impl Strategy {
    /// Placement policy for the linear strategies, `None` for
    /// the buddy system.
    pub fn fit(self) -> Option<Fit> {
        match self {
            Strategy::FirstFit => Some(Fit::First),
            Strategy::BestFit => Some(Fit::Best),
            Strategy::WorstFit => Some(Fit::Worst),
            Strategy::Buddy => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::FirstFit => "first_fit",
            Strategy::BestFit => "best_fit",
            Strategy::WorstFit => "worst_fit",
            Strategy::Buddy => "buddy",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown allocator '{0}'")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Both the underscore and the dashed spellings are
        // accepted.
        match s.replace('-', "_").as_str() {
            "first_fit" => Ok(Strategy::FirstFit),
            "best_fit" => Ok(Strategy::BestFit),
            "worst_fit" => Ok(Strategy::WorstFit),
            "buddy" => Ok(Strategy::Buddy),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Engine currently serving requests. Only one exists at a
/// time; switching between the linear and the buddy engine
/// throws the previous one away.
enum Engine {
    Linear(BlockList),
    Buddy(BuddyAllocator),
}

/// Request counters kept by the manager itself, regardless of
/// which engine served the requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub total_requests: u64,
    pub successful_allocations: u64,
    pub failed_allocations: u64,
    /// Alignment padding of linear requests, in bytes.
    pub internal_fragmentation: u64,
}

/// Front of the simulator: owns the active engine, routes
/// requests to it and keeps aggregate statistics.
pub struct MemoryManager {
    /// Size of the simulated address space; 0 until `init`.
    total_memory: u64,
    strategy: Strategy,
    engine: Engine,
    counters: Counters,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            total_memory: 0,
            strategy: Strategy::FirstFit,
            engine: Engine::Linear(BlockList::new(0)),
            counters: Counters::default(),
        }
    }

    /// Reset the address space to `size` bytes, all free. The
    /// counters are cleared and the engine of the current
    /// strategy is initialized from scratch.
    pub fn init(&mut self, size: u64) -> Result<(), AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidConfiguration {
                size,
                reason: "memory size must be positive",
            });
        }

        self.total_memory = size;
        self.counters = Counters::default();
        info!("Memory initialized with {} bytes ({}).", size, self.strategy);

        self.reset_engine()
    }

    /// Switch the allocation strategy. Changing the placement
    /// policy of the linear engine keeps the current blocks;
    /// selecting the buddy system, even when it is already
    /// active, or leaving it starts over with an empty address
    /// space of the same size.
    ///
    /// The strategy is switched even if the buddy engine then
    /// rejects the memory size; it stays unusable until the
    /// next successful `init`.
    pub fn set_strategy(&mut self, strategy: Strategy) -> Result<(), AllocError> {
        let previous = self.strategy;
        self.strategy = strategy;
        info!("Allocator set to {} (was {}).", strategy, previous);

        // Moving between the linear strategies is the only switch
        // that keeps the current state.
        let engine_changed = previous.fit().is_some() != strategy.fit().is_some();
        let buddy_reselected = strategy == Strategy::Buddy && self.total_memory > 0;
        if engine_changed || buddy_reselected {
            self.reset_engine()
        } else {
            Ok(())
        }
    }

    fn reset_engine(&mut self) -> Result<(), AllocError> {
        match self.strategy {
            Strategy::Buddy => {
                let mut buddy = BuddyAllocator::new();
                let result = if self.total_memory > 0 {
                    buddy.init(self.total_memory)
                } else {
                    Ok(())
                };
                self.engine = Engine::Buddy(buddy);
                result
            }
            _ => {
                self.engine = Engine::Linear(BlockList::new(self.total_memory));
                Ok(())
            }
        }
    }

    pub fn allocate(&mut self, size: u64) -> Result<Allocation, AllocError> {
        self.counters.total_requests += 1;

        let result = if self.total_memory == 0 {
            Err(AllocError::Uninitialized)
        } else {
            match (&mut self.engine, self.strategy.fit()) {
                (Engine::Linear(list), Some(fit)) => {
                    // The padding is accounted for before the
                    // engine even looks for a block, so failed
                    // requests contribute to it too.
                    if let Some(aligned) = align_up(size, ALIGNMENT) {
                        self.counters.internal_fragmentation += aligned - size;
                    }
                    list.allocate(size, fit)
                }
                (Engine::Buddy(buddy), None) => {
                    // The buddy system would happily round an
                    // empty request up to a whole block.
                    if size == 0 {
                        Err(AllocError::OutOfMemory { requested: size })
                    } else {
                        buddy.allocate(size)
                    }
                }
                // The engine always matches the strategy after
                // `set_strategy`.
                _ => Err(AllocError::Uninitialized),
            }
        };

        match &result {
            Ok(allocation) => {
                self.counters.successful_allocations += 1;
                debug!(
                    "Allocated id={} at 0x{:04x} ({} bytes requested, {} reserved).",
                    allocation.id, allocation.address, size, allocation.size,
                );
            }
            Err(error) => {
                self.counters.failed_allocations += 1;
                debug!("Allocation of {} bytes failed: {}.", size, error);
            }
        }

        result
    }

    pub fn free(&mut self, id: AllocationId) -> Result<(), AllocError> {
        let result = match &mut self.engine {
            Engine::Linear(list) => list.free(id),
            Engine::Buddy(buddy) => buddy.free(id),
        };

        if result.is_ok() {
            debug!("Freed id={}.", id);
        }
        result
    }

    pub fn dump_memory(&self) -> MemoryDump {
        match &self.engine {
            Engine::Linear(list) => MemoryDump::Linear(list.blocks().collect()),
            Engine::Buddy(buddy) => MemoryDump::Buddy {
                free_lists: buddy.free_lists()
                    .map(|(order, size, list)| (order, size, list.iter().copied().collect()))
                    .collect(),
                allocations: buddy.allocations().collect(),
            },
        }
    }

    pub fn stats(&self) -> Stats {
        let (used, free, fragmentation) = match &self.engine {
            Engine::Linear(list) => {
                let free = list.free_memory();
                let largest = list.largest_free_block();

                // External fragmentation is the share of free
                // memory that is not part of the largest free
                // block.
                let external = if free == 0 {
                    0.0
                } else {
                    (free - largest) as f64 / free as f64 * 100.0
                };

                (
                    list.used_memory(),
                    free,
                    Some((external, self.counters.internal_fragmentation)),
                )
            }
            Engine::Buddy(buddy) => (buddy.used_memory(), buddy.free_memory(), None),
        };

        Stats::new(
            self.strategy,
            self.total_memory,
            used,
            free,
            fragmentation,
            self.counters,
        )
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_layout(manager: &MemoryManager) -> Vec<(u64, u64, Option<AllocationId>)> {
        match manager.dump_memory() {
            MemoryDump::Linear(blocks) => blocks.iter().map(|b| (b.start, b.size, b.owner)).collect(),
            MemoryDump::Buddy { .. } => panic!("expected a linear layout"),
        }
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("first_fit".parse(), Ok(Strategy::FirstFit));
        assert_eq!("best-fit".parse(), Ok(Strategy::BestFit));
        assert_eq!("worst_fit".parse(), Ok(Strategy::WorstFit));
        assert_eq!("buddy".parse(), Ok(Strategy::Buddy));
        assert_eq!("next_fit".parse::<Strategy>(), Err(UnknownStrategy("next_fit".into())));
        assert_eq!(Strategy::BestFit.to_string(), "best_fit");
    }

    #[test]
    fn test_allocate_before_init() {
        let mut manager = MemoryManager::new();
        assert_eq!(manager.allocate(8), Err(AllocError::Uninitialized));
        assert_eq!(manager.counters().failed_allocations, 1);
        assert!(manager.init(0).is_err());
    }

    #[test]
    fn test_first_fit_scenario() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();

        let a = manager.allocate(10).unwrap();
        assert_eq!((a.id, a.address), (1, 0));
        let b = manager.allocate(20).unwrap();
        assert_eq!((b.id, b.address), (2, 16));
        manager.free(a.id).unwrap();
        let c = manager.allocate(8).unwrap();
        assert_eq!(c.address, 0);

        assert_eq!(
            linear_layout(&manager),
            vec![(0, 8, Some(3)), (8, 8, None), (16, 24, Some(2)), (40, 24, None)],
        );

        let stats = manager.stats();
        assert_eq!(stats.used, 32);
        assert_eq!(stats.free, 32);
        assert_eq!(stats.internal_fragmentation, Some(10));
        assert_eq!(stats.external_fragmentation, Some(25.0));
        assert_eq!(stats.success_rate, Some(100.0));
    }

    #[test]
    fn test_fragmentation_counted_on_failure() {
        let mut manager = MemoryManager::new();
        manager.init(16).unwrap();

        assert!(manager.allocate(17).is_err());
        let counters = manager.counters();
        assert_eq!(counters.internal_fragmentation, 7);
        assert_eq!(counters.failed_allocations, 1);
        assert_eq!(counters.total_requests, 1);
    }

    #[test]
    fn test_linear_switch_keeps_blocks() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();
        manager.allocate(16).unwrap();

        manager.set_strategy(Strategy::BestFit).unwrap();
        assert_eq!(linear_layout(&manager), vec![(0, 16, Some(1)), (16, 48, None)]);
        assert_eq!(manager.allocate(8).unwrap().id, 2);
    }

    #[test]
    fn test_buddy_switch_resets_engine() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();
        manager.allocate(16).unwrap();

        manager.set_strategy(Strategy::Buddy).unwrap();
        let a = manager.allocate(8).unwrap();
        assert_eq!((a.id, a.address), (1, 0));
        let b = manager.allocate(8).unwrap();
        assert_eq!(b.address, 8);

        let stats = manager.stats();
        assert_eq!(stats.used, 16);
        assert_eq!(stats.free, 48);
        assert_eq!(stats.external_fragmentation, None);
        assert_eq!(stats.internal_fragmentation, None);

        // Buddy requests do not add alignment padding.
        manager.allocate(3).unwrap();
        assert_eq!(manager.counters().internal_fragmentation, 0);

        manager.set_strategy(Strategy::FirstFit).unwrap();
        assert_eq!(linear_layout(&manager), vec![(0, 64, None)]);
    }

    #[test]
    fn test_buddy_reselect_reinitializes() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();
        manager.set_strategy(Strategy::Buddy).unwrap();
        manager.allocate(8).unwrap();
        manager.allocate(16).unwrap();

        manager.set_strategy(Strategy::Buddy).unwrap();
        let MemoryDump::Buddy { free_lists, allocations } = manager.dump_memory() else {
            panic!("expected a buddy layout");
        };
        assert!(allocations.is_empty());
        assert_eq!(free_lists.last(), Some(&(3, 64, vec![0])));
        assert!(free_lists[..3].iter().all(|(_, _, list)| list.is_empty()));

        let a = manager.allocate(8).unwrap();
        assert_eq!(a.address, 0);
        assert_eq!(manager.stats().used, 8);
    }

    #[test]
    fn test_buddy_rejects_size() {
        let mut manager = MemoryManager::new();
        manager.init(100).unwrap();

        let error = manager.set_strategy(Strategy::Buddy).unwrap_err();
        assert!(matches!(error, AllocError::InvalidConfiguration { size: 100, .. }));
        assert_eq!(manager.strategy(), Strategy::Buddy);
        assert_eq!(manager.allocate(8), Err(AllocError::Uninitialized));
        assert_eq!(manager.allocate(8), Err(AllocError::Uninitialized));

        manager.init(128).unwrap();
        assert!(manager.allocate(8).is_ok());
    }

    #[test]
    fn test_buddy_zero_size() {
        let mut manager = MemoryManager::new();
        manager.set_strategy(Strategy::Buddy).unwrap();
        manager.init(64).unwrap();

        assert!(matches!(manager.allocate(0), Err(AllocError::OutOfMemory { requested: 0 })));
    }

    #[test]
    fn test_free_routes_to_engine() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();
        let a = manager.allocate(8).unwrap();

        assert_eq!(manager.free(99), Err(AllocError::InvalidIdentifier(99)));
        assert_eq!(manager.free(a.id), Ok(()));
        assert_eq!(manager.free(a.id), Err(AllocError::InvalidIdentifier(a.id)));
    }

    #[test]
    fn test_init_resets_counters() {
        let mut manager = MemoryManager::new();
        manager.init(64).unwrap();
        manager.allocate(5).unwrap();
        manager.allocate(500).unwrap_err();

        manager.init(32).unwrap();
        assert_eq!(manager.counters(), Counters::default());
        assert_eq!(manager.stats().success_rate, None);
        assert_eq!(linear_layout(&manager), vec![(0, 32, None)]);
    }
}
