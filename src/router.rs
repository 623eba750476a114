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

//! The sharded cache router
//!
//! [`VectorMap`] owns a power-of-two array of shards and routes every
//! operation by the key digest's shard half. Shards never coordinate; only
//! the aggregate statistics sum across them. Construction wires in the
//! optional background eviction scheduler, which stops when the map drops.

use std::sync::Arc;

use crate::config::{Config, MapType};
use crate::error::Result;
use crate::hash::{self, KeyDigest};
use crate::policy::{Lfu, Lru};
use crate::scheduler::Scheduler;
use crate::shard::{EliminateOutcome, GcOutcome, Shard};
use crate::value::ValueRef;

/// Dispatch one shard's method through the policy enum
macro_rules! on_shard {
    ($set:expr, $idx:expr, |$s:ident| $body:expr) => {
        match $set {
            ShardSet::Lru(shards) => {
                let $s = &shards[$idx];
                $body
            }
            ShardSet::Lfu(shards) => {
                let $s = &shards[$idx];
                $body
            }
        }
    };
}

/// Sum a per-shard statistic across the set
macro_rules! sum_shards {
    ($set:expr, |$s:ident| $body:expr) => {
        match $set {
            ShardSet::Lru(shards) => shards.iter().map(|$s| $body).sum(),
            ShardSet::Lfu(shards) => shards.iter().map(|$s| $body).sum(),
        }
    };
}

/// The shard array, concrete per eviction policy
pub(crate) enum ShardSet {
    Lru(Box<[Shard<Lru>]>),
    Lfu(Box<[Shard<Lfu>]>),
}

impl ShardSet {
    pub fn buckets(&self) -> usize {
        match self {
            ShardSet::Lru(shards) => shards.len(),
            ShardSet::Lfu(shards) => shards.len(),
        }
    }

    pub fn eliminate(&self, idx: usize) -> EliminateOutcome {
        on_shard!(self, idx, |s| s.eliminate())
    }

    pub fn gc_copy(&self, idx: usize) -> GcOutcome {
        on_shard!(self, idx, |s| s.gc_copy())
    }
}

/// Shared core: the shard array plus routing state
pub(crate) struct MapInner {
    pub(crate) shards: ShardSet,
    mask: u64,
    mem_cap: u64,
}

/// Aggregate statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub len: usize,
    pub items: u64,
    pub used_mem: u64,
    pub effective_mem: u64,
    pub max_mem: u64,
    pub queries: u64,
    pub misses: u64,
    pub upsert_fails: u64,
}

/// Sharded, memory-bounded, self-evicting byte cache
pub struct VectorMap {
    inner: Arc<MapInner>,
    /// Held for its drop: stops and joins the eviction workers
    _scheduler: Option<Scheduler>,
}

impl VectorMap {
    /// A cache sized for roughly `target_entries` entries with default
    /// production configuration
    pub fn new(target_entries: u32) -> Self {
        Self::with_config(target_entries, Config::default()).expect("default config is valid")
    }

    /// A cache with explicit configuration. Production mode clamps
    /// out-of-range values; debug mode rejects them.
    pub fn with_config(target_entries: u32, config: Config) -> Result<Self> {
        let cfg = config.normalized()?;
        let buckets = cfg.buckets;
        let shard_mem = cfg.shard_mem();
        let per_shard =
            ((target_entries as u64 + buckets as u64 - 1) / buckets as u64).max(1) as u32;

        let shards = match cfg.map_type {
            MapType::Lru => ShardSet::Lru(
                (0..buckets)
                    .map(|_| Shard::new(per_shard, shard_mem, cfg.lru_unit_time))
                    .collect(),
            ),
            MapType::Lfu => ShardSet::Lfu(
                (0..buckets)
                    .map(|_| Shard::new(per_shard, shard_mem, cfg.lru_unit_time))
                    .collect(),
            ),
        };

        let inner = Arc::new(MapInner {
            shards,
            mask: (buckets - 1) as u64,
            mem_cap: cfg.mem_cap,
        });
        let scheduler = cfg
            .eliminate
            .as_ref()
            .map(|e| Scheduler::start(Arc::clone(&inner), e.clone()));

        Ok(Self {
            inner,
            _scheduler: scheduler,
        })
    }

    #[inline]
    fn route(&self, key: &[u8]) -> (usize, u64, KeyDigest) {
        let (digest, hi, lo) = hash::digest(key);
        ((hi & self.inner.mask) as usize, lo, digest)
    }

    /// Insert or update a key. `false` means the cache is full: the entry
    /// was dropped and the failure counter incremented.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> bool {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.upsert(lo, &digest, value))
    }

    /// Update an existing key only; absent keys are left absent
    pub fn update(&self, key: &[u8], value: &[u8]) -> bool {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.update(lo, &digest, value))
    }

    /// Update an existing key from pre-split segments, concatenated
    /// logically; avoids an intermediate copy when the caller already holds
    /// the value in parts
    pub fn update_vectored(&self, key: &[u8], total_len: usize, parts: &[&[u8]]) -> bool {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.update_vectored(
            lo,
            &digest,
            total_len as u32,
            parts
        ))
    }

    /// Read a key. The returned [`ValueRef`] releases its pooled buffer or
    /// arena reference when dropped.
    pub fn get(&self, key: &[u8]) -> Option<ValueRef> {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.get(lo, &digest))
    }

    /// Remove a key; `false` if it was not present
    pub fn remove(&self, key: &[u8]) -> bool {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.remove(lo, &digest))
    }

    /// Existence check; cheaper than `get` for LFU caches
    pub fn contains_key(&self, key: &[u8]) -> bool {
        let (idx, lo, digest) = self.route(key);
        on_shard!(&self.inner.shards, idx, |s| s.contains_key(lo, &digest))
    }

    /// Drop every entry and start each shard on a fresh arena generation
    pub fn clear(&self) {
        match &self.inner.shards {
            ShardSet::Lru(shards) => shards.iter().for_each(|s| s.clear()),
            ShardSet::Lfu(shards) => shards.iter().for_each(|s| s.clear()),
        }
    }

    /// Live entries across all shards
    pub fn len(&self) -> usize {
        sum_shards!(&self.inner.shards, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live arena records across all shards
    pub fn item_count(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.item_count() as u64)
    }

    /// Slot headroom before shards start rehashing
    pub fn remaining_capacity(&self) -> usize {
        sum_shards!(&self.inner.shards, |s| s.remaining_capacity())
    }

    /// Arena bytes consumed, including not-yet-compacted garbage
    pub fn used_mem(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.used_mem())
    }

    /// Arena bytes attributable to live entries
    pub fn effective_mem(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.effective_mem())
    }

    /// The configured memory budget
    pub fn max_mem(&self) -> u64 {
        self.inner.mem_cap
    }

    pub fn query_count(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.query_count())
    }

    pub fn miss_count(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.miss_count())
    }

    /// Upserts refused for capacity; persistently rising means the cache is
    /// running over budget
    pub fn upsert_fail_count(&self) -> u64 {
        sum_shards!(&self.inner.shards, |s| s.upsert_fail_count())
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.shards.buckets()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            len: self.len(),
            items: self.item_count(),
            used_mem: self.used_mem(),
            effective_mem: self.effective_mem(),
            max_mem: self.max_mem(),
            queries: self.query_count(),
            misses: self.miss_count(),
            upsert_fails: self.upsert_fail_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KIB;

    fn debug_map(buckets: usize, mem_cap: u64) -> VectorMap {
        VectorMap::with_config(
            128,
            Config {
                buckets,
                mem_cap,
                debug: true,
                ..Config::default()
            },
        )
        .expect("valid debug config")
    }

    #[test]
    fn test_round_trip_across_shards() {
        let map = debug_map(8, 512 * KIB);
        for i in 0..500u32 {
            let key = format!("key-{}", i);
            assert!(map.upsert(key.as_bytes(), key.as_bytes()));
        }
        assert_eq!(map.len(), 500);
        assert_eq!(map.item_count(), 500);

        for i in 0..500u32 {
            let key = format!("key-{}", i);
            let got = map.get(key.as_bytes()).expect("present");
            assert_eq!(&*got, key.as_bytes());
        }
    }

    #[test]
    fn test_bucket_count_is_power_of_two() {
        let map = debug_map(6, 64 * KIB);
        assert_eq!(map.bucket_count(), 8);
    }

    #[test]
    fn test_update_only_touches_existing() {
        let map = debug_map(1, 64 * KIB);
        assert!(!map.update(b"k", b"v"));
        assert!(map.is_empty());

        assert!(map.upsert(b"k", b"v"));
        assert!(map.update(b"k", b"w"));
        assert_eq!(&*map.get(b"k").unwrap(), b"w");
    }

    #[test]
    fn test_vectored_update() {
        let map = debug_map(1, 64 * KIB);
        assert!(map.upsert(b"key", b"slice"));
        assert!(map.update_vectored(b"key", 8, &[b"new", b"slice"]));
        assert_eq!(&*map.get(b"key").unwrap(), b"newslice");
    }

    #[test]
    fn test_clear_empties_every_shard() {
        let map = debug_map(4, 256 * KIB);
        for i in 0..100u32 {
            assert!(map.upsert(format!("k{}", i).as_bytes(), b"v"));
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.item_count(), 0);
        assert!(map.upsert(b"after", b"clear"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_memory_budget_is_respected() {
        let map = debug_map(2, 8 * KIB);
        let mut fails = 0u32;
        for i in 0..2000u32 {
            if !map.upsert(format!("key-{}", i).as_bytes(), &[0u8; 64]) {
                fails += 1;
            }
        }
        assert!(fails > 0, "an 8 KiB budget cannot hold 2000 records");
        assert!(map.used_mem() <= map.max_mem());
        assert_eq!(map.upsert_fail_count() as u32, fails);
    }

    #[test]
    fn test_lfu_map_round_trip() {
        let map = VectorMap::with_config(
            64,
            Config {
                buckets: 2,
                mem_cap: 64 * KIB,
                map_type: MapType::Lfu,
                debug: true,
                ..Config::default()
            },
        )
        .expect("valid config");
        assert!(map.upsert(b"a", b"1"));
        assert!(map.contains_key(b"a"));
        assert_eq!(&*map.get(b"a").unwrap(), b"1");
        assert!(map.remove(b"a"));
        assert!(!map.contains_key(b"a"));
    }

    #[test]
    fn test_stats_snapshot() {
        let map = debug_map(2, 64 * KIB);
        assert!(map.upsert(b"a", b"1"));
        let _ = map.get(b"a");
        let _ = map.get(b"missing");

        let stats = map.stats();
        assert_eq!(stats.len, 1);
        assert_eq!(stats.items, 1);
        assert_eq!(stats.queries, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.max_mem, 64 * KIB);
        assert!(stats.used_mem > 0);
        assert!(stats.used_mem <= stats.max_mem);
    }
}
