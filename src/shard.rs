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

//! The per-bucket table
//!
//! One [`Shard`] owns an open-addressed table over one arena generation:
//! control bytes, slot indexes and heat values in 16-slot groups, probed
//! with batched tag matching. The same generic table serves both eviction
//! policies; [`EvictPolicy`] decides the heat width and when heat changes.
//!
//! # Locking
//!
//! Three domains per shard:
//!
//! 1. `put_lock` serializes every mutation (updates, upserts, removals,
//!    eviction). Reads never take it.
//! 2. `state` is read-held by every operation while it walks the probe
//!    sequence and write-held only to swap in a rebuilt table (rehash,
//!    compaction, clear). Swapping under the write lock is what lets a
//!    probe never observe a half-built table.
//! 3. The arena's in-place lock covers the one true read/write race:
//!    short-value rewrites and slot-index/header republishing against
//!    concurrent key/header reads and short-value copy-outs.
//!
//! Control bytes and slot indexes are atomics published with release
//! stores and read with acquire loads, so a record's bytes are visible
//! before the slot that names them. Counters are relaxed: they have a
//! single writer under `put_lock` and racy readers only for statistics.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::byte_pool;
use crate::group_match::{self, EMPTY, GROUP_SIZE, MAX_AVG_GROUP_LOAD, TOMBSTONE};
use crate::hash::{self, KeyDigest};
use crate::holder::{KvHolder, SlotIdx, ValueSpec, MAX_VALUE_SIZE, OVER_SHORT_SIZE};
use crate::mintop::{Candidate, HeatValue, MinTop};
use crate::policy::{EvictPolicy, HeatClock, HeatSlot};
use crate::value::ValueRef;

/// Items-memory fraction at which eviction starts
const ELIMINATE_START: f32 = 0.95;
/// Items-memory fraction eviction aims back down to
const ELIMINATE_END: f32 = 0.90;
/// Eviction is wasteful while the cache is mostly hitting
const ELIMINATE_MISS_RATE: f32 = 0.1;

// Compaction cost scales with live data, so the garbage bar drops as the
// arena fills: below 30% fill never compact, below 60% demand half garbage,
// below 90% just over a third, above that a tenth is enough.
const GC_FILL_LOW: f32 = 0.3;
const GC_FILL_MID: f32 = 0.6;
const GC_FILL_HIGH: f32 = 0.9;
const GC_GARBAGE_MID: f32 = 0.5;
const GC_GARBAGE_HIGH: f32 = 0.35;
const GC_GARBAGE_MAX: f32 = 0.1;

/// Rehash growth factor
const REHASH_GROWTH: f32 = 1.2;

/// Why an eviction pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvictSkip {
    /// Hit rate is healthy; evicting would only cause misses
    LowMissRate,
    /// Memory usage below the start watermark
    BelowWatermark,
    /// Rounded down to zero candidates
    NoCandidates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EliminateOutcome {
    Evicted(usize),
    Skipped(EvictSkip),
}

/// Why a compaction pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcSkip {
    /// Not enough reclaimable bytes to justify a rebuild
    GarbageLow,
    /// A rehash or another compaction is already running
    RehashInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GcStats {
    /// Tombstoned slots reclaimed
    pub dead: usize,
    /// Arena bytes recovered
    pub reclaimed: u32,
    /// Whether the recency clock was rebased (LRU only)
    pub rebased: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcOutcome {
    Collected(GcStats),
    Skipped(GcSkip),
}

/// 16 control bytes packed into two atomic words, little-endian byte order
struct CtrlGroup {
    words: [AtomicU64; 2],
}

const EMPTY_WORD: u64 = 0x8080_8080_8080_8080;

impl CtrlGroup {
    fn new() -> Self {
        Self {
            words: [AtomicU64::new(EMPTY_WORD), AtomicU64::new(EMPTY_WORD)],
        }
    }

    #[inline]
    fn snapshot(&self) -> [u8; GROUP_SIZE] {
        let mut out = [0u8; GROUP_SIZE];
        out[..8].copy_from_slice(&self.words[0].load(Ordering::Acquire).to_le_bytes());
        out[8..].copy_from_slice(&self.words[1].load(Ordering::Acquire).to_le_bytes());
        out
    }

    /// Single-writer under the mutation lock, so plain load+store suffices
    #[inline]
    fn set(&self, slot: usize, byte: u8) {
        let word = &self.words[slot / 8];
        let shift = (slot % 8) * 8;
        let old = word.load(Ordering::Relaxed);
        let new = (old & !(0xFFu64 << shift)) | ((byte as u64) << shift);
        word.store(new, Ordering::Release);
    }
}

/// 16 slot indexes, republished with single atomic word stores
struct SlotGroup([AtomicU32; GROUP_SIZE]);

impl SlotGroup {
    fn new() -> Self {
        Self(std::array::from_fn(|_| AtomicU32::new(0)))
    }

    #[inline]
    fn load(&self, slot: usize) -> SlotIdx {
        SlotIdx::from_raw(self.0[slot].load(Ordering::Acquire))
    }

    #[inline]
    fn store(&self, slot: usize, idx: SlotIdx) {
        self.0[slot].store(idx.raw(), Ordering::Release);
    }
}

/// One generation of the table: swapped wholesale by rehash and compaction
struct TableState<P: EvictPolicy> {
    ctrl: Box<[CtrlGroup]>,
    slots: Box<[SlotGroup]>,
    heat: Box<[[P::Cell; GROUP_SIZE]]>,
    holder: KvHolder,
}

impl<P: EvictPolicy> TableState<P> {
    fn with_groups(groups: usize, shard_mem: u32, generations: Arc<AtomicUsize>) -> Self {
        Self {
            ctrl: (0..groups).map(|_| CtrlGroup::new()).collect(),
            slots: (0..groups).map(|_| SlotGroup::new()).collect(),
            heat: (0..groups)
                .map(|_| std::array::from_fn(|_| P::Cell::default()))
                .collect(),
            holder: KvHolder::new(shard_mem, generations),
        }
    }

    #[inline]
    fn groups(&self) -> usize {
        self.ctrl.len()
    }
}

fn num_groups(entries: u32) -> usize {
    (((entries + MAX_AVG_GROUP_LOAD - 1) / MAX_AVG_GROUP_LOAD) as usize).max(1)
}

#[inline]
fn wrap(g: usize, groups: usize) -> usize {
    if g + 1 >= groups {
        0
    } else {
        g + 1
    }
}

/// One bucket's table
pub(crate) struct Shard<P: EvictPolicy> {
    state: RwLock<TableState<P>>,
    put_lock: Mutex<()>,
    clock: HeatClock,
    /// Occupied+tombstoned ceiling before a rehash is due
    limit: AtomicU32,
    /// Occupied + tombstoned-by-removal slots
    resident: AtomicU32,
    /// Tombstoned slots awaiting compaction
    dead: AtomicU32,
    query_cnt: AtomicU64,
    miss_cnt: AtomicU64,
    upsert_fails: AtomicU64,
    rehashing: AtomicBool,
    /// Heat floor of the survivors of the last eviction pass
    evict_floor: AtomicU32,
    generations: Arc<AtomicUsize>,
    shard_mem: u32,
}

impl<P: EvictPolicy> Shard<P> {
    pub fn new(entries: u32, shard_mem: u32, unit: Duration) -> Self {
        Self::with_clock(entries, shard_mem, HeatClock::new(unit))
    }

    pub fn with_clock(entries: u32, shard_mem: u32, clock: HeatClock) -> Self {
        let groups = num_groups(entries);
        let generations = Arc::new(AtomicUsize::new(0));
        Self {
            state: RwLock::new(TableState::with_groups(
                groups,
                shard_mem,
                Arc::clone(&generations),
            )),
            put_lock: Mutex::new(()),
            clock,
            limit: AtomicU32::new(groups as u32 * MAX_AVG_GROUP_LOAD),
            resident: AtomicU32::new(0),
            dead: AtomicU32::new(0),
            query_cnt: AtomicU64::new(0),
            miss_cnt: AtomicU64::new(0),
            upsert_fails: AtomicU64::new(0),
            rehashing: AtomicBool::new(false),
            evict_floor: AtomicU32::new(0),
            generations,
            shard_mem,
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn contains_key(&self, lo: u64, key: &KeyDigest) -> bool {
        self.query_cnt.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let groups = state.groups();
        let (h1, h2) = hash::split_hash(lo);
        let mut g = hash::probe_start(h1, groups);
        loop {
            let ctrl = state.ctrl[g].snapshot();
            let mut matches = group_match::match_tag(&ctrl, h2);
            while matches != 0 {
                let s = group_match::next_match(&mut matches);
                let guard = state.holder.inplace().read();
                let idx = state.slots[g].load(s);
                let hit = !idx.is_vacant() && state.holder.key_bytes(idx) == key;
                drop(guard);
                if hit {
                    P::on_has(&state.heat[g][s], &self.clock);
                    return true;
                }
            }
            if group_match::match_empty(&ctrl) != 0 {
                self.miss_cnt.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            g = wrap(g, groups);
        }
    }

    pub fn get(&self, lo: u64, key: &KeyDigest) -> Option<ValueRef> {
        self.query_cnt.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let groups = state.groups();
        let (h1, h2) = hash::split_hash(lo);
        let mut g = hash::probe_start(h1, groups);
        loop {
            let ctrl = state.ctrl[g].snapshot();
            let mut matches = group_match::match_tag(&ctrl, h2);
            while matches != 0 {
                let s = group_match::next_match(&mut matches);
                let guard = state.holder.inplace().read();
                let idx = state.slots[g].load(s);
                if idx.is_vacant() || state.holder.key_bytes(idx) != key {
                    drop(guard);
                    continue;
                }

                let spec = state.holder.value_spec(idx, state.holder.header(idx));
                let value = match spec {
                    ValueSpec::Short { len, .. } => {
                        // Short values are copied out under the in-place
                        // read lock; they may be rewritten in place later
                        let len = len as usize;
                        let mut buf = byte_pool::global().get(len);
                        buf.as_mut_slice()[..len]
                            .copy_from_slice(state.holder.value_bytes(spec));
                        ValueRef::pooled(buf, len)
                    }
                    ValueSpec::Big { off, len } | ValueSpec::OverLong { off, len } => {
                        // Immutable until the generation dies: hand out a
                        // view pinning the generation
                        ValueRef::shared(
                            state.holder.buffer().clone(),
                            off as usize,
                            len as usize,
                        )
                    }
                };
                drop(guard);
                P::on_get(&state.heat[g][s], &self.clock);
                return Some(value);
            }
            if group_match::match_empty(&ctrl) != 0 {
                self.miss_cnt.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            g = wrap(g, groups);
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Probe for an exact key. Callers hold `put_lock`, so the result is
    /// stable until they release it.
    fn locate(
        &self,
        state: &TableState<P>,
        lo: u64,
        key: &KeyDigest,
    ) -> Option<(usize, usize, SlotIdx)> {
        let groups = state.groups();
        let (h1, h2) = hash::split_hash(lo);
        let mut g = hash::probe_start(h1, groups);
        loop {
            let ctrl = state.ctrl[g].snapshot();
            let mut matches = group_match::match_tag(&ctrl, h2);
            while matches != 0 {
                let s = group_match::next_match(&mut matches);
                let idx = state.slots[g].load(s);
                if !idx.is_vacant() && state.holder.key_bytes(idx) == key {
                    return Some((g, s, idx));
                }
            }
            if group_match::match_empty(&ctrl) != 0 {
                return None;
            }
            g = wrap(g, groups);
        }
    }

    /// Tombstone a slot and drop its record from the accounting
    fn drop_record(&self, state: &TableState<P>, g: usize, s: usize, idx: SlotIdx) {
        state.holder.del(idx);
        state.slots[g].store(s, SlotIdx::VACANT);
        state.ctrl[g].set(s, TOMBSTONE);
        state.heat[g][s].store(Default::default());
        self.dead.fetch_add(1, Ordering::Relaxed);
    }

    /// Rewrite the value of an existing record. Requires `put_lock`.
    fn update_value(
        &self,
        state: &TableState<P>,
        g: usize,
        s: usize,
        idx: SlotIdx,
        total_len: u32,
        parts: &[&[u8]],
    ) -> bool {
        let holder = &state.holder;

        if total_len >= MAX_VALUE_SIZE {
            // Oversized writes evict the entry outright
            self.drop_record(state, g, s, idx);
            return false;
        }

        let old = holder.value_spec(idx, holder.header(idx));

        // Short-to-short rewrite inside the retained capacity class
        if let ValueSpec::Short { off, cap, .. } = old {
            if total_len < OVER_SHORT_SIZE && total_len <= cap {
                let w = holder.inplace().write();
                holder.write_in_place(idx, off, total_len, parts);
                drop(w);
                P::on_update(&state.heat[g][s], &self.clock);
                return true;
            }
        }

        // Everything else appends a fresh value region and relinks
        match holder.append_value(total_len, parts) {
            Some(appended) => {
                holder.release_value(old);
                let w = holder.inplace().write();
                let new_idx = holder.relink(idx, appended);
                state.slots[g].store(s, new_idx);
                drop(w);
                P::on_update(&state.heat[g][s], &self.clock);
                true
            }
            None => {
                self.drop_record(state, g, s, idx);
                false
            }
        }
    }

    /// Update an existing key; absent keys are not inserted
    pub fn update(&self, lo: u64, key: &KeyDigest, value: &[u8]) -> bool {
        self.update_vectored(lo, key, value.len() as u32, &[value])
    }

    /// Update from pre-split segments, concatenated logically
    pub fn update_vectored(
        &self,
        lo: u64,
        key: &KeyDigest,
        total_len: u32,
        parts: &[&[u8]],
    ) -> bool {
        debug_assert_eq!(
            total_len as usize,
            parts.iter().map(|p| p.len()).sum::<usize>(),
            "total_len must match the segment sum"
        );
        let _p = self.put_lock.lock();
        let state = self.state.read();
        match self.locate(&state, lo, key) {
            Some((g, s, idx)) => self.update_value(&state, g, s, idx, total_len, parts),
            None => false,
        }
    }

    /// Insert or update. May rehash synchronously first.
    pub fn upsert(&self, lo: u64, key: &KeyDigest, value: &[u8]) -> bool {
        let lv = value.len() as u32;
        if lv >= MAX_VALUE_SIZE {
            self.upsert_fails.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.state.read().holder.at_fill_limit() {
            self.upsert_fails.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.rehashing.load(Ordering::Relaxed) {
            self.upsert_fails.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let _p = self.put_lock.lock();
        if self.resident.load(Ordering::Relaxed) >= self.limit.load(Ordering::Relaxed) {
            self.rehashing.store(true, Ordering::Relaxed);
            self.rehash();
            self.rehashing.store(false, Ordering::Relaxed);
        }

        let state = self.state.read();
        let groups = state.groups();
        let (h1, h2) = hash::split_hash(lo);
        let mut g = hash::probe_start(h1, groups);
        loop {
            let ctrl = state.ctrl[g].snapshot();
            let mut matches = group_match::match_tag(&ctrl, h2);
            while matches != 0 {
                let s = group_match::next_match(&mut matches);
                let idx = state.slots[g].load(s);
                if !idx.is_vacant() && state.holder.key_bytes(idx) == key {
                    let ok = self.update_value(&state, g, s, idx, lv, &[value]);
                    if !ok {
                        self.upsert_fails.fetch_add(1, Ordering::Relaxed);
                    }
                    return ok;
                }
            }

            let mut empties = group_match::match_empty(&ctrl);
            if empties != 0 {
                let s = group_match::next_match(&mut empties);
                return match state.holder.append_record(key, lv, &[value]) {
                    Some(idx) => {
                        state.slots[g].store(s, idx);
                        state.heat[g][s].store(P::insert_heat(&self.clock));
                        state.ctrl[g].set(s, h2);
                        self.resident.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    None => {
                        self.upsert_fails.fetch_add(1, Ordering::Relaxed);
                        false
                    }
                };
            }
            g = wrap(g, groups);
        }
    }

    /// Tombstone a key. Uses EMPTY instead when the group still has an
    /// EMPTY byte, which keeps future probes short.
    pub fn remove(&self, lo: u64, key: &KeyDigest) -> bool {
        let _p = self.put_lock.lock();
        let state = self.state.read();
        match self.locate(&state, lo, key) {
            Some((g, s, idx)) => {
                state.holder.del(idx);
                state.slots[g].store(s, SlotIdx::VACANT);
                state.heat[g][s].store(Default::default());
                if group_match::match_empty(&state.ctrl[g].snapshot()) != 0 {
                    state.ctrl[g].set(s, EMPTY);
                    self.resident.fetch_sub(1, Ordering::Relaxed);
                } else {
                    state.ctrl[g].set(s, TOMBSTONE);
                    self.dead.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Reset to an empty table over a fresh arena generation
    pub fn clear(&self) {
        let _p = self.put_lock.lock();
        let mut state = self.state.write();
        let groups = state.groups();
        *state = TableState::with_groups(groups, self.shard_mem, Arc::clone(&self.generations));
        self.resident.store(0, Ordering::Relaxed);
        self.dead.store(0, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Rebuilds
    // ------------------------------------------------------------------

    /// Move every live record of `old` into `new`, re-deriving probe
    /// positions from the stored digests. Returns the new resident count.
    fn migrate(old: &TableState<P>, new: &TableState<P>) -> u32 {
        let mut moved = 0u32;
        for g in 0..old.groups() {
            let ctrl = old.ctrl[g].snapshot();
            for s in 0..GROUP_SIZE {
                if ctrl[s] == EMPTY || ctrl[s] == TOMBSTONE {
                    continue;
                }
                let idx = old.slots[g].load(s);
                if idx.is_vacant() {
                    continue;
                }

                let key: KeyDigest = old
                    .holder
                    .key_bytes(idx)
                    .try_into()
                    .expect("stored key width");
                let spec = old.holder.value_spec(idx, old.holder.header(idx));
                let value = old.holder.value_bytes(spec);

                let (_, lo) = hash::digest_halves(&key);
                let (h1, h2) = hash::split_hash(lo);
                let groups = new.groups();
                let mut ng = hash::probe_start(h1, groups);
                loop {
                    let nctrl = new.ctrl[ng].snapshot();
                    let mut empties = group_match::match_empty(&nctrl);
                    if empties != 0 {
                        let ns = group_match::next_match(&mut empties);
                        match new.holder.append_record(&key, value.len() as u32, &[value]) {
                            Some(nidx) => {
                                new.slots[ng].store(ns, nidx);
                                new.heat[ng][ns].store(old.heat[g][s].load());
                                new.ctrl[ng].set(ns, h2);
                                moved += 1;
                            }
                            None => {
                                // Same-capacity rebuilds always fit; guard
                                // against accounting drift anyway
                                warn!(
                                    len = value.len(),
                                    "record dropped during rebuild: arena full"
                                );
                            }
                        }
                        break;
                    }
                    ng = wrap(ng, groups);
                }
            }
        }
        moved
    }

    /// Grow (or same-size clean) rebuild. Requires `put_lock`.
    fn rehash(&self) {
        let (new_state, moved, new_groups) = {
            let state = self.state.read();
            let groups = state.groups();
            let dead = self.dead.load(Ordering::Relaxed);
            let resident = self.resident.load(Ordering::Relaxed);
            // Mostly tombstones: reclaiming them is enough, keep the size
            let n = if dead >= resident / 2 {
                groups
            } else {
                (groups as f32 * REHASH_GROWTH).ceil() as usize
            };
            let new = TableState::with_groups(n, self.shard_mem, Arc::clone(&self.generations));
            let moved = Self::migrate(&state, &new);
            (new, moved, n)
        };

        let mut state = self.state.write();
        *state = new_state;
        drop(state);
        self.limit
            .store(new_groups as u32 * MAX_AVG_GROUP_LOAD, Ordering::Relaxed);
        self.resident.store(moved, Ordering::Relaxed);
        self.dead.store(0, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// Tombstone the coldest entries once memory is tight
    pub fn eliminate(&self) -> EliminateOutcome {
        let queries = self.query_cnt.load(Ordering::Relaxed);
        let misses = self.miss_cnt.load(Ordering::Relaxed);
        if queries > 0 && (misses as f32 / queries as f32) < ELIMINATE_MISS_RATE {
            return EliminateOutcome::Skipped(EvictSkip::LowMissRate);
        }
        if self.state.read().holder.items_mem_usage() < ELIMINATE_START {
            return EliminateOutcome::Skipped(EvictSkip::BelowWatermark);
        }

        let _p = self.put_lock.lock();
        let state = self.state.read();
        let items = state.holder.items();
        let n = ((items as f32) * (ELIMINATE_START - ELIMINATE_END) / ELIMINATE_START).ceil()
            as usize;
        if n == 0 {
            return EliminateOutcome::Skipped(EvictSkip::NoCandidates);
        }

        let mut top = MinTop::new(n);
        'scan: for g in 0..state.groups() {
            let ctrl = state.ctrl[g].snapshot();
            for s in 0..GROUP_SIZE {
                if ctrl[s] == EMPTY || ctrl[s] == TOMBSTONE {
                    continue;
                }
                top.offer(Candidate {
                    group: g as u32,
                    slot: s as u8,
                    value: state.heat[g][s].load(),
                });
                if top.saturated_at_zero() {
                    break 'scan;
                }
            }
        }

        let floor = top.floor();
        let mut evicted = 0usize;
        for c in top.into_candidates() {
            let (g, s) = (c.group as usize, c.slot as usize);
            let byte = state.ctrl[g].snapshot()[s];
            if byte == EMPTY || byte == TOMBSTONE {
                continue;
            }
            let idx = state.slots[g].load(s);
            state.holder.del(idx);
            state.slots[g].store(s, SlotIdx::VACANT);
            state.ctrl[g].set(s, TOMBSTONE);
            self.dead.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
        }

        self.evict_floor.store(floor.as_u32(), Ordering::Relaxed);
        if P::AGES_ON_ELIMINATE && floor.as_u32() != 0 {
            // Survivors all sit at or above the floor; shifting everything
            // down keeps counters comparable across generations of traffic
            for g in 0..state.groups() {
                for cell in &state.heat[g] {
                    cell.store(cell.load().saturating_sub(floor));
                }
            }
        }

        EliminateOutcome::Evicted(evicted)
    }

    /// Rebuild the arena to shed tombstone and stale-record bytes
    pub fn gc_copy(&self) -> GcOutcome {
        {
            let state = self.state.read();
            let holder = &state.holder;
            let fill = holder.mem_usage();
            let garbage = 1.0 - holder.mem_use_rate();
            if fill < GC_FILL_LOW
                || (fill < GC_FILL_MID && garbage < GC_GARBAGE_MID)
                || (fill < GC_FILL_HIGH && garbage < GC_GARBAGE_HIGH)
                || garbage < GC_GARBAGE_MAX
            {
                return GcOutcome::Skipped(GcSkip::GarbageLow);
            }
        }
        if self.rehashing.swap(true, Ordering::Relaxed) {
            return GcOutcome::Skipped(GcSkip::RehashInProgress);
        }
        let stats = self.compact();
        self.rehashing.store(false, Ordering::Relaxed);
        GcOutcome::Collected(stats)
    }

    /// The unconditional compaction pass behind `gc_copy`
    fn compact(&self) -> GcStats {
        let _p = self.put_lock.lock();
        let (new_state, moved, old_used, dead, rebased) = {
            let state = self.state.read();
            let old_used = state.holder.used();
            let dead = self.dead.load(Ordering::Relaxed) as usize;
            let new = TableState::with_groups(
                state.groups(),
                self.shard_mem,
                Arc::clone(&self.generations),
            );
            let moved = Self::migrate(&state, &new);

            let mut rebased = false;
            if P::REBASES_CLOCK {
                let floor = self.evict_floor.load(Ordering::Relaxed);
                if floor > 0 && self.clock.take_rebase_due() {
                    let fv = <<P::Cell as HeatSlot>::Value as HeatValue>::from_u32_lossy(floor);
                    for g in 0..new.groups() {
                        for cell in &new.heat[g] {
                            cell.store(cell.load().saturating_sub(fv));
                        }
                    }
                    self.clock.rebase(floor.min(u16::MAX as u32) as u16);
                    rebased = true;
                }
            }
            (new, moved, old_used, dead, rebased)
        };

        let reclaimed = old_used.saturating_sub(new_state.holder.used());
        let mut state = self.state.write();
        // The old generation's handle drops here; its bytes survive until
        // the last outstanding read releases
        *state = new_state;
        drop(state);
        self.resident.store(moved, Ordering::Relaxed);
        self.dead.store(0, Ordering::Relaxed);

        GcStats {
            dead,
            reclaimed,
            rebased,
        }
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub fn len(&self) -> usize {
        let resident = self.resident.load(Ordering::Relaxed);
        let dead = self.dead.load(Ordering::Relaxed);
        resident.saturating_sub(dead) as usize
    }

    pub fn item_count(&self) -> u32 {
        self.state.read().holder.items()
    }

    pub fn remaining_capacity(&self) -> usize {
        let limit = self.limit.load(Ordering::Relaxed);
        let resident = self.resident.load(Ordering::Relaxed);
        limit.saturating_sub(resident) as usize
    }

    pub fn used_mem(&self) -> u64 {
        self.state.read().holder.used() as u64
    }

    pub fn effective_mem(&self) -> u64 {
        self.state.read().holder.effective() as u64
    }

    pub fn query_count(&self) -> u64 {
        self.query_cnt.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_cnt.load(Ordering::Relaxed)
    }

    pub fn upsert_fail_count(&self) -> u64 {
        self.upsert_fails.load(Ordering::Relaxed)
    }

    pub fn dead_count(&self) -> u32 {
        self.dead.load(Ordering::Relaxed)
    }

    /// Arena generations currently alive (current one plus any pinned by
    /// outstanding zero-copy reads)
    pub fn live_generations(&self) -> usize {
        self.generations.load(Ordering::Relaxed)
    }
}
