use super::buddy::BuddyRecord;
use super::memory::{AllocationId, BlockView};
use super::{Counters, Strategy};

use std::fmt;

/// Snapshot of the memory manager statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub strategy: Strategy,
    pub total_memory: u64,
    pub used: u64,
    pub free: u64,
    /// Used memory over total memory, in percent.
    pub utilization: f64,
    /// Only tracked by the linear strategies.
    pub external_fragmentation: Option<f64>,
    /// Only tracked by the linear strategies.
    pub internal_fragmentation: Option<u64>,
    /// `None` until at least one request has been made.
    pub success_rate: Option<f64>,
    pub failure_rate: Option<f64>,
    pub counters: Counters,
}

impl Stats {
    pub(super) fn new(
        strategy: Strategy,
        total_memory: u64,
        used: u64,
        free: u64,
        fragmentation: Option<(f64, u64)>,
        counters: Counters,
    ) -> Self {
        let utilization = percent(used, total_memory).unwrap_or(0.0);
        let success_rate = percent(counters.successful_allocations, counters.total_requests);
        let failure_rate = percent(counters.failed_allocations, counters.total_requests);

        Self {
            strategy,
            total_memory,
            used,
            free,
            utilization,
            external_fragmentation: fragmentation.map(|(external, _)| external),
            internal_fragmentation: fragmentation.map(|(_, internal)| internal),
            success_rate,
            failure_rate,
            counters,
        }
    }
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64 * 100.0)
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics ({}):", self.strategy)?;
        writeln!(f, "Total memory: {}", self.total_memory)?;
        writeln!(f, "Used memory : {}", self.used)?;
        writeln!(f, "Free memory : {}", self.free)?;
        writeln!(f, "Utilization : {:.2}%", self.utilization)?;

        if let Some(external) = self.external_fragmentation {
            writeln!(f, "External fragmentation: {:.2}%", external)?;
        }
        if let Some(internal) = self.internal_fragmentation {
            writeln!(f, "Internal fragmentation: {} bytes", internal)?;
        }

        if let (Some(success), Some(failure)) = (self.success_rate, self.failure_rate) {
            writeln!(f, "Allocation success rate: {:.2}%", success)?;
            writeln!(f, "Allocation failure rate: {:.2}%", failure)?;
        }

        Ok(())
    }
}

/// Layout of the address space, as seen by the active engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryDump {
    /// Blocks of the linear allocator, in address order.
    Linear(Vec<BlockView>),
    /// Free lists per order (order, block size, addresses) and
    /// allocated blocks of the buddy allocator.
    Buddy {
        free_lists: Vec<(usize, u64, Vec<u64>)>,
        allocations: Vec<(AllocationId, BuddyRecord)>,
    },
}

impl fmt::Display for MemoryDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryDump::Linear(blocks) => {
                writeln!(f, "Memory Layout:")?;
                for block in blocks {
                    writeln!(f, "{block}")?;
                }
            }
            MemoryDump::Buddy { free_lists, allocations } => {
                writeln!(f, "Buddy Memory State:")?;

                writeln!(f, "Free Lists:")?;
                for (order, size, addresses) in free_lists {
                    write!(f, "Order {order} (size {size}): [")?;
                    for address in addresses {
                        write!(f, " {address}")?;
                    }
                    writeln!(f, "{}]", if addresses.is_empty() { "" } else { " " })?;
                }

                writeln!(f, "Allocated Blocks:")?;
                if allocations.is_empty() {
                    writeln!(f, "None")?;
                }
                for (id, record) in allocations {
                    writeln!(f, "ID={} Address={} Size={}", id, record.address, record.size)?;
                }
            }
        }

        Ok(())
    }
}
