use super::{Cache, CacheConfig, CacheError};

use std::fmt;

/// Level of the hierarchy that served an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessLevel {
    L1,
    L2,
    Memory,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::L1 => write!(f, "L1 hit"),
            AccessLevel::L2 => write!(f, "L1 miss, L2 hit"),
            AccessLevel::Memory => write!(f, "L1 miss, L2 miss, served from memory"),
        }
    }
}

/// Two independent caches chained together: an access missing
/// in L1 is forwarded to L2, and one missing in L2 goes to
/// memory. The caches do not know about each other; a line
/// fetched from memory is inserted in both of them only because
/// both looked it up and missed.
pub struct CacheHierarchy {
    l1: Cache,
    l2: Cache,
    l1_to_l2: u64,
    l2_to_memory: u64,
}

impl CacheHierarchy {
    pub fn new(l1: CacheConfig, l2: CacheConfig) -> Result<Self, CacheError> {
        Ok(Self {
            l1: Cache::new(l1)?,
            l2: Cache::new(l2)?,
            l1_to_l2: 0,
            l2_to_memory: 0,
        })
    }

    pub fn access(&mut self, address: u64) -> AccessLevel {
        if self.l1.access(address) {
            return AccessLevel::L1;
        }

        self.l1_to_l2 += 1;
        if self.l2.access(address) {
            return AccessLevel::L2;
        }

        self.l2_to_memory += 1;
        AccessLevel::Memory
    }

    pub fn l1(&self) -> &Cache {
        &self.l1
    }

    pub fn l2(&self) -> &Cache {
        &self.l2
    }

    pub fn stats(&self) -> HierarchyStats {
        HierarchyStats {
            l1: LevelStats::of(&self.l1),
            l2: LevelStats::of(&self.l2),
            l1_to_l2: self.l1_to_l2,
            l2_to_memory: self.l2_to_memory,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: Option<f64>,
}

impl LevelStats {
    fn of(cache: &Cache) -> Self {
        Self {
            hits: cache.hits(),
            misses: cache.misses(),
            hit_ratio: cache.hit_ratio(),
        }
    }
}

/// Counters of both levels plus the misses each level passed
/// on to the next one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HierarchyStats {
    pub l1: LevelStats,
    pub l2: LevelStats,
    pub l1_to_l2: u64,
    pub l2_to_memory: u64,
}

impl fmt::Display for HierarchyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Stats:")?;
        for (name, level) in [("L1", &self.l1), ("L2", &self.l2)] {
            writeln!(f, "{} Hits: {} Misses: {}", name, level.hits, level.misses)?;
            if let Some(ratio) = level.hit_ratio {
                writeln!(f, "{} Hit Ratio: {:.2}", name, ratio)?;
            }
        }

        writeln!(f, "Miss Propagation:")?;
        writeln!(f, "L1 Misses forwarded to L2: {}", self.l1_to_l2)?;
        writeln!(f, "L2 Misses forwarded to Memory: {}", self.l2_to_memory)
    }
}
