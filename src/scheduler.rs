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

//! Background eviction scheduler
//!
//! A small fixed pool of worker threads strides the shard array: worker `w`
//! of `n` visits shards `w, w+n, w+2n, …`, pausing between shards so a pass
//! never monopolizes the mutation locks, and pausing (with jitter) between
//! passes. Compaction is considered on every pass; eviction alternates
//! on/off per pass, since a freshly evicted shard needs traffic before
//! another pass is worth it. Workers stop promptly and are joined when the
//! owning map drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

use crate::config::EliminateConfig;
use crate::router::MapInner;
use crate::shard::{EliminateOutcome, GcOutcome};

pub(crate) struct Scheduler {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(inner: Arc<MapInner>, cfg: EliminateConfig) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let workers = (0..cfg.workers)
            .map(|w| {
                let inner = Arc::clone(&inner);
                let stop = Arc::clone(&stop);
                let cfg = cfg.clone();
                std::thread::Builder::new()
                    .name(format!("vectormap-evict-{}", w))
                    .spawn(move || worker_loop(w, inner, cfg, stop))
                    .expect("spawn eviction worker")
            })
            .collect();
        Self { stop, workers }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(worker: usize, inner: Arc<MapInner>, cfg: EliminateConfig, stop: Arc<AtomicBool>) {
    let mut rng = rand::thread_rng();
    let stride = cfg.workers.max(1);
    let mut do_eliminate = false;

    while !stop.load(Ordering::Relaxed) {
        let started = Instant::now();
        let mut evicted_shards = 0usize;
        let mut evicted_items = 0usize;
        let mut gc_shards = 0usize;
        let mut gc_items = 0usize;
        let mut gc_bytes = 0u64;

        let buckets = inner.shards.buckets();
        let mut idx = worker;
        while idx < buckets {
            if do_eliminate {
                if let EliminateOutcome::Evicted(n) = inner.shards.eliminate(idx) {
                    if n > 0 {
                        evicted_shards += 1;
                        evicted_items += n;
                    }
                }
            }
            if let GcOutcome::Collected(stats) = inner.shards.gc_copy(idx) {
                gc_shards += 1;
                gc_items += stats.dead;
                gc_bytes += stats.reclaimed as u64;
            }
            if !pause(&stop, cfg.step) {
                return;
            }
            idx += stride;
        }

        info!(
            worker,
            cost_ms = started.elapsed().as_millis() as u64,
            eliminate = do_eliminate,
            evicted_shards,
            evicted_items,
            gc_shards,
            gc_items,
            gc_bytes,
            "eviction cycle finished"
        );

        do_eliminate = !do_eliminate;
        let jitter_ceiling = (cfg.cycle.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rng.gen_range(0..=jitter_ceiling));
        if !pause(&stop, cfg.cycle + jitter) {
            return;
        }
    }
}

/// Sleep in small chunks so shutdown stays prompt. Returns `false` when the
/// stop flag was raised.
fn pause(stop: &AtomicBool, duration: Duration) -> bool {
    const CHUNK: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(CHUNK));
    }
}
