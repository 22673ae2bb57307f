use crate::core::{
    allocator::Strategy,
    cache::CacheConfig,
};

use std::env;
use anyhow::{anyhow, Context, Result};

/// L1 cache: 64 bytes, 16-byte lines, direct mapped.
pub const DEFAULT_L1: CacheConfig = CacheConfig::new(64, 16, 1);
/// L2 cache: 256 bytes, 16-byte lines, 4-way set associative.
pub const DEFAULT_L2: CacheConfig = CacheConfig::new(256, 16, 4);

pub const L1_VAR: &str = "MEMSIM_L1";
pub const L2_VAR: &str = "MEMSIM_L2";
pub const MEMORY_VAR: &str = "MEMSIM_MEMORY";
pub const STRATEGY_VAR: &str = "MEMSIM_STRATEGY";

/// Startup configuration of the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimConfig {
    pub l1: CacheConfig,
    pub l2: CacheConfig,
    /// Memory size to initialize at startup, if any.
    pub memory: Option<u64>,
    /// Strategy to select at startup, if any.
    pub strategy: Option<Strategy>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            l1: DEFAULT_L1,
            l2: DEFAULT_L2,
            memory: None,
            strategy: None,
        }
    }
}

impl SimConfig {
    /// Defaults, overridden by the `MEMSIM_*` environment
    /// variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, with an arbitrary source of
    /// variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(L1_VAR) {
            config.l1 = parse_geometry(&value).with_context(|| format!("Invalid {L1_VAR}"))?;
        }
        if let Some(value) = lookup(L2_VAR) {
            config.l2 = parse_geometry(&value).with_context(|| format!("Invalid {L2_VAR}"))?;
        }
        if let Some(value) = lookup(MEMORY_VAR) {
            let size = value.trim()
                .parse()
                .with_context(|| format!("Invalid {MEMORY_VAR} '{value}'"))?;
            config.memory = Some(size);
        }
        if let Some(value) = lookup(STRATEGY_VAR) {
            let strategy = value.trim()
                .parse()
                .with_context(|| format!("Invalid {STRATEGY_VAR}"))?;
            config.strategy = Some(strategy);
        }

        Ok(config)
    }
}

/// Parse a cache geometry written as `size:block:associativity`.
pub fn parse_geometry(value: &str) -> Result<CacheConfig> {
    let fields = value
        .split(':')
        .map(|field| {
            field.trim()
                .parse::<u64>()
                .with_context(|| format!("'{field}' is not a number"))
        })
        .collect::<Result<Vec<_>>>()?;

    match fields[..] {
        [cache_size, block_size, associativity] => {
            Ok(CacheConfig::new(cache_size, block_size, associativity))
        }
        _ => Err(anyhow!("expected size:block:associativity, got '{value}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.l1, CacheConfig::new(64, 16, 1));
        assert_eq!(config.l2, CacheConfig::new(256, 16, 4));
    }

    #[test]
    fn test_overrides() {
        let config = SimConfig::from_lookup(lookup(&[
            (L1_VAR, "128:32:2"),
            (MEMORY_VAR, "1024"),
            (STRATEGY_VAR, "buddy"),
        ]))
        .unwrap();

        assert_eq!(config.l1, CacheConfig::new(128, 32, 2));
        assert_eq!(config.l2, DEFAULT_L2);
        assert_eq!(config.memory, Some(1024));
        assert_eq!(config.strategy, Some(Strategy::Buddy));
    }

    #[test]
    fn test_invalid_values() {
        assert!(SimConfig::from_lookup(lookup(&[(L2_VAR, "256:16")])).is_err());
        assert!(SimConfig::from_lookup(lookup(&[(L1_VAR, "64:x:1")])).is_err());
        assert!(SimConfig::from_lookup(lookup(&[(MEMORY_VAR, "-4")])).is_err());
        assert!(SimConfig::from_lookup(lookup(&[(STRATEGY_VAR, "next_fit")])).is_err());
    }
}
