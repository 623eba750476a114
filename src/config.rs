// Copyright 2025 Vectormap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cache engine configuration
//!
//! [`Config`] controls shard count, the global memory budget, the eviction
//! policy and the optional background eviction scheduler. In production mode
//! out-of-range values are clamped into their working ranges; with
//! [`Config::debug`] set, clamps are disabled and invalid values are
//! construction errors instead (intended for tests).

use std::time::Duration;

use crate::error::{Error, Result};

/// One kibibyte
pub const KIB: u64 = 1024;
/// One mebibyte
pub const MIB: u64 = 1024 * KIB;
/// One gibibyte
pub const GIB: u64 = 1024 * MIB;

/// Production floor for the shard count
pub const MIN_BUCKETS: usize = 1024;
/// Production ceiling for the shard count
pub const MAX_BUCKETS: usize = 4096;

/// Production floor for the global memory budget
pub const MIN_MEM_CAP: u64 = GIB;
/// Production ceiling for the global memory budget
pub const MAX_MEM_CAP: u64 = 128 * GIB;

/// Per-shard arena ceiling. Record offsets are stored as 24-bit word
/// offsets, which addresses at most 64 MiB per arena.
pub const MAX_SHARD_MEM: u64 = 64 * MIB;

/// Default recency bucket granularity
pub const DEFAULT_UNIT_TIME: Duration = Duration::from_secs(30);

/// Production floor for the scheduler cycle pause
pub const MIN_CYCLE: Duration = Duration::from_secs(8);

/// Default pause between shards within one scheduler cycle
pub const DEFAULT_STEP: Duration = Duration::from_millis(500);

/// Eviction ranking policy for a cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapType {
    /// Least-recently-used: 16-bit time buckets, refreshed on every hit
    #[default]
    Lru,
    /// Least-frequently-used: 8-bit saturating hit counters
    Lfu,
}

/// Background eviction scheduler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminateConfig {
    /// Number of worker threads striding the shard array
    pub workers: usize,
    /// Pause between full passes over a worker's shards
    pub cycle: Duration,
    /// Pause between consecutive shards within a pass
    pub step: Duration,
}

impl EliminateConfig {
    /// Scheduler with `workers` threads and the given cycle pause
    pub fn new(workers: usize, cycle: Duration) -> Self {
        Self {
            workers,
            cycle,
            step: DEFAULT_STEP,
        }
    }

    /// Override the per-shard pause
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }
}

/// Configuration for [`VectorMap`](crate::VectorMap) construction
#[derive(Debug, Clone)]
pub struct Config {
    /// Shard count; rounded up to a power of two. Clamped to
    /// [`MIN_BUCKETS`]..=[`MAX_BUCKETS`] unless `debug` is set.
    pub buckets: usize,
    /// Global memory budget in bytes, split evenly across shards. Clamped to
    /// [`MIN_MEM_CAP`]..=[`MAX_MEM_CAP`] unless `debug` is set.
    pub mem_cap: u64,
    /// Eviction ranking policy
    pub map_type: MapType,
    /// Enables the background eviction scheduler when set
    pub eliminate: Option<EliminateConfig>,
    /// Recency bucket granularity (LRU only)
    pub lru_unit_time: Duration,
    /// Disables production clamps; invalid values become errors
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buckets: MIN_BUCKETS,
            mem_cap: MIN_MEM_CAP,
            map_type: MapType::Lru,
            eliminate: None,
            lru_unit_time: DEFAULT_UNIT_TIME,
            debug: false,
        }
    }
}

impl Config {
    /// Validate and normalize into the working ranges.
    ///
    /// Production mode clamps; debug mode rejects. The returned config always
    /// has a power-of-two bucket count and a non-zero per-shard arena.
    pub(crate) fn normalized(mut self) -> Result<Config> {
        if self.debug {
            if self.buckets == 0 {
                return Err(Error::ZeroBuckets);
            }
            if self.lru_unit_time.is_zero() {
                return Err(Error::ZeroUnitTime);
            }
            if let Some(e) = &self.eliminate {
                if e.workers == 0 {
                    return Err(Error::ZeroWorkers);
                }
                if e.cycle.is_zero() {
                    return Err(Error::ZeroCycle);
                }
            }
        } else {
            self.buckets = self.buckets.clamp(MIN_BUCKETS, MAX_BUCKETS);
            self.mem_cap = self.mem_cap.clamp(MIN_MEM_CAP, MAX_MEM_CAP);
            if let Some(e) = &mut self.eliminate {
                if e.workers == 0 {
                    e.workers = 1;
                }
                if e.cycle < MIN_CYCLE {
                    e.cycle = MIN_CYCLE;
                }
            }
        }

        self.buckets = self.buckets.next_power_of_two();
        if self.shard_mem() == 0 {
            return Err(Error::MemCapTooSmall {
                got: self.mem_cap,
                buckets: self.buckets,
                min: 1,
            });
        }
        Ok(self)
    }

    /// Arena capacity of a single shard, in bytes
    pub(crate) fn shard_mem(&self) -> u32 {
        let per_shard = self.mem_cap / self.buckets as u64;
        per_shard.min(MAX_SHARD_MEM) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_clamps() {
        let cfg = Config {
            buckets: 3,
            mem_cap: 1,
            ..Config::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.buckets, MIN_BUCKETS);
        assert_eq!(cfg.mem_cap, MIN_MEM_CAP);

        let cfg = Config {
            buckets: 100_000,
            mem_cap: u64::MAX,
            ..Config::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.buckets, MAX_BUCKETS);
        assert_eq!(cfg.mem_cap, MAX_MEM_CAP);
    }

    #[test]
    fn test_buckets_rounded_to_power_of_two() {
        let cfg = Config {
            buckets: 3000,
            ..Config::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.buckets, 4096);
        assert!(cfg.buckets.is_power_of_two());
    }

    #[test]
    fn test_debug_mode_rejects_invalid() {
        let cfg = Config {
            buckets: 0,
            debug: true,
            ..Config::default()
        };
        assert_eq!(cfg.normalized().unwrap_err(), Error::ZeroBuckets);

        let cfg = Config {
            buckets: 1,
            lru_unit_time: Duration::ZERO,
            debug: true,
            ..Config::default()
        };
        assert_eq!(cfg.normalized().unwrap_err(), Error::ZeroUnitTime);

        let cfg = Config {
            buckets: 1,
            eliminate: Some(EliminateConfig::new(0, Duration::from_millis(100))),
            debug: true,
            ..Config::default()
        };
        assert_eq!(cfg.normalized().unwrap_err(), Error::ZeroWorkers);
    }

    #[test]
    fn test_debug_mode_keeps_small_values() {
        let cfg = Config {
            buckets: 2,
            mem_cap: 3 * KIB,
            debug: true,
            ..Config::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.buckets, 2);
        assert_eq!(cfg.shard_mem(), 1536);
    }

    #[test]
    fn test_shard_mem_ceiling() {
        let cfg = Config {
            buckets: 1024,
            mem_cap: MAX_MEM_CAP,
            ..Config::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(cfg.shard_mem() as u64, MAX_SHARD_MEM);
    }
}
