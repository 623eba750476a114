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

//! Eviction policies
//!
//! A policy decides what the per-slot heat means and when it changes:
//!
//! - [`Lru`]: heat is a 16-bit time bucket since shard start, refreshed on
//!   every hit (including existence checks). The bucket clock is rebased
//!   periodically during compaction so it never drifts out of 16 bits.
//! - [`Lfu`]: heat is an 8-bit hit counter, saturating at 200, bumped on
//!   reads only; existence checks stay cheap. Counters are aged down after
//!   every eviction pass so old popularity decays.
//!
//! Heat cells are relaxed atomics: hits update them from the read path
//! without taking the mutation lock, and the ranking only needs to be
//! approximately fresh.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::mintop::HeatValue;

/// LFU hit counter saturation point
pub(crate) const MAX_HIT_COUNT: u8 = 200;

/// How often compaction may rebase the recency clock
pub(crate) const DEFAULT_REBASE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// One slot's heat storage
pub(crate) trait HeatSlot: Default + Send + Sync + 'static {
    type Value: HeatValue;

    fn load(&self) -> Self::Value;
    fn store(&self, v: Self::Value);
}

impl HeatSlot for AtomicU8 {
    type Value = u8;

    #[inline]
    fn load(&self) -> u8 {
        AtomicU8::load(self, Ordering::Relaxed)
    }

    #[inline]
    fn store(&self, v: u8) {
        AtomicU8::store(self, v, Ordering::Relaxed)
    }
}

impl HeatSlot for AtomicU16 {
    type Value = u16;

    #[inline]
    fn load(&self) -> u16 {
        AtomicU16::load(self, Ordering::Relaxed)
    }

    #[inline]
    fn store(&self, v: u16) {
        AtomicU16::store(self, v, Ordering::Relaxed)
    }
}

/// The shard's recency clock: elapsed time in configurable units, minus the
/// rebased amount
pub(crate) struct HeatClock {
    start: Instant,
    unit_nanos: u64,
    /// Units already subtracted from every stored bucket
    rebased: AtomicU32,
    last_rebase: Mutex<Instant>,
    rebase_window: Duration,
}

impl HeatClock {
    pub fn new(unit: Duration) -> Self {
        Self::with_rebase_window(unit, DEFAULT_REBASE_WINDOW)
    }

    pub fn with_rebase_window(unit: Duration, rebase_window: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            unit_nanos: unit.as_nanos().max(1) as u64,
            rebased: AtomicU32::new(0),
            last_rebase: Mutex::new(now),
            rebase_window,
        }
    }

    /// Current time bucket
    #[inline]
    pub fn bucket(&self) -> u16 {
        let elapsed = self.start.elapsed().as_nanos() as u64 / self.unit_nanos;
        let rebased = self.rebased.load(Ordering::Relaxed) as u64;
        elapsed.saturating_sub(rebased).min(u16::MAX as u64) as u16
    }

    /// True once per rebase window; marks the window as consumed
    pub fn take_rebase_due(&self) -> bool {
        let mut last = self.last_rebase.lock();
        if last.elapsed() > self.rebase_window {
            *last = Instant::now();
            true
        } else {
            false
        }
    }

    /// Shift the clock down by `floor` units; stored buckets must be
    /// reduced by the same amount by the caller
    pub fn rebase(&self, floor: u16) {
        self.rebased.fetch_add(floor as u32, Ordering::Relaxed);
    }
}

/// A heat discipline for one table instantiation
pub(crate) trait EvictPolicy: Send + Sync + 'static {
    type Cell: HeatSlot;

    /// Short policy name for logs
    const NAME: &'static str;
    /// Compaction periodically subtracts the eviction floor from all buckets
    const REBASES_CLOCK: bool;
    /// Eviction passes age all counters down by the eviction floor
    const AGES_ON_ELIMINATE: bool;

    fn on_get(cell: &Self::Cell, clock: &HeatClock);
    fn on_has(cell: &Self::Cell, clock: &HeatClock);
    fn on_update(cell: &Self::Cell, clock: &HeatClock);
    fn insert_heat(clock: &HeatClock) -> <Self::Cell as HeatSlot>::Value;
}

/// Least-recently-used: time buckets, refreshed on every touch
pub(crate) struct Lru;

impl EvictPolicy for Lru {
    type Cell = AtomicU16;

    const NAME: &'static str = "lru";
    const REBASES_CLOCK: bool = true;
    const AGES_ON_ELIMINATE: bool = false;

    #[inline]
    fn on_get(cell: &AtomicU16, clock: &HeatClock) {
        HeatSlot::store(cell, clock.bucket());
    }

    #[inline]
    fn on_has(cell: &AtomicU16, clock: &HeatClock) {
        HeatSlot::store(cell, clock.bucket());
    }

    #[inline]
    fn on_update(cell: &AtomicU16, clock: &HeatClock) {
        HeatSlot::store(cell, clock.bucket());
    }

    #[inline]
    fn insert_heat(clock: &HeatClock) -> u16 {
        clock.bucket()
    }
}

/// Least-frequently-used: saturating hit counters, reads only
pub(crate) struct Lfu;

impl EvictPolicy for Lfu {
    type Cell = AtomicU8;

    const NAME: &'static str = "lfu";
    const REBASES_CLOCK: bool = false;
    const AGES_ON_ELIMINATE: bool = true;

    #[inline]
    fn on_get(cell: &AtomicU8, _clock: &HeatClock) {
        let c = HeatSlot::load(cell);
        if c < MAX_HIT_COUNT {
            HeatSlot::store(cell, c + 1);
        }
    }

    #[inline]
    fn on_has(_cell: &AtomicU8, _clock: &HeatClock) {
        // Existence checks are deliberately cheap and leave frequency alone
    }

    #[inline]
    fn on_update(_cell: &AtomicU8, _clock: &HeatClock) {}

    #[inline]
    fn insert_heat(_clock: &HeatClock) -> u8 {
        1
    }
}
