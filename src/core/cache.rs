mod hierarchy;

pub use hierarchy::{AccessLevel, CacheHierarchy, HierarchyStats, LevelStats};

use std::fmt;
use thiserror::Error;
use log::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid cache geometry {0}: sizes and associativity must be positive")]
    ZeroParameter(CacheConfig),
    #[error("invalid cache geometry {0}: the cache holds less than one set")]
    NoSets(CacheConfig),
    #[error("invalid cache geometry {0}: more than {} lines", MAX_LINES)]
    TooLarge(CacheConfig),
}

/// Upper bound on the number of lines a simulated cache may
/// hold.
pub const MAX_LINES: u64 = 1 << 20;

/// Geometry of a cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Capacity of the cache in bytes.
    pub cache_size: u64,
    /// Size of a line in bytes.
    pub block_size: u64,
    /// Number of lines per set; 1 means direct mapped.
    pub associativity: u64,
}

impl CacheConfig {
    pub const fn new(cache_size: u64, block_size: u64, associativity: u64) -> Self {
        Self { cache_size, block_size, associativity }
    }
}

impl fmt::Display for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}B/{}B/{}-way",
            self.cache_size, self.block_size, self.associativity,
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct CacheLine {
    valid: bool,
    tag: u64,
    /// Value of the access counter when the line was filled.
    /// Hits do not update it, so the smallest stamp of a set is
    /// always the line that was inserted first.
    inserted_at: u64,
}

/// Set-associative cache with FIFO replacement within a set.
pub struct Cache {
    config: CacheConfig,
    num_sets: u64,
    sets: Vec<Vec<CacheLine>>,
    access_counter: u64,
    hits: u64,
    misses: u64,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        let CacheConfig { cache_size, block_size, associativity } = config;
        if cache_size == 0 || block_size == 0 || associativity == 0 {
            return Err(CacheError::ZeroParameter(config));
        }

        // The cache holds cache_size / block_size lines, which
        // are grouped into sets of `associativity` lines each.
        let num_blocks = cache_size / block_size;
        let num_sets = num_blocks / associativity;
        if num_sets == 0 {
            return Err(CacheError::NoSets(config));
        }

        // num_sets * associativity never exceeds num_blocks, so
        // bounding the lines bounds both dimensions.
        if num_sets * associativity > MAX_LINES {
            return Err(CacheError::TooLarge(config));
        }
        let (ways, set_count) = match (usize::try_from(associativity), usize::try_from(num_sets)) {
            (Ok(ways), Ok(set_count)) => (ways, set_count),
            _ => return Err(CacheError::TooLarge(config)),
        };

        let sets = vec![vec![CacheLine::default(); ways]; set_count];
        debug!("Cache {} created with {} sets.", config, num_sets);

        Ok(Self {
            config,
            num_sets,
            sets,
            access_counter: 0,
            hits: 0,
            misses: 0,
        })
    }

    /// Look up `address`, filling or replacing a line on a
    /// miss. Returns `true` on a hit.
    pub fn access(&mut self, address: u64) -> bool {
        self.access_counter += 1;

        // An address maps to the memory block that contains it;
        // the low bits of the block number select the set, and
        // the remaining high bits are kept as the tag.
        let block_addr = address / self.config.block_size;
        let set_index = (block_addr % self.num_sets) as usize;
        let tag = block_addr / self.num_sets;

        let set = &mut self.sets[set_index];
        if set.iter().any(|line| line.valid && line.tag == tag) {
            self.hits += 1;
            return true;
        }

        self.misses += 1;
        let stamp = self.access_counter;

        // Fill an empty line if there is one, otherwise replace
        // the line that was inserted first.
        let victim = match set.iter().position(|line| !line.valid) {
            Some(index) => index,
            None => {
                let index = set
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, line)| line.inserted_at)
                    .map(|(index, _)| index)
                    .unwrap_or(0);
                trace!(
                    "Evicted tag 0x{:x} from set {} for tag 0x{:x}.",
                    set[index].tag, set_index, tag,
                );
                index
            }
        };

        set[victim] = CacheLine {
            valid: true,
            tag,
            inserted_at: stamp,
        };

        false
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn num_sets(&self) -> u64 {
        self.num_sets
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn accesses(&self) -> u64 {
        self.access_counter
    }

    /// Hits over accesses, or `None` before the first access.
    pub fn hit_ratio(&self) -> Option<f64> {
        (self.access_counter > 0).then(|| self.hits as f64 / self.access_counter as f64)
    }
}
