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

//! Concurrency Integration Tests
//!
//! Every key maps to a fixed, key-derived value, so a reader can verify any
//! value it observes no matter how the race interleaves: a `get` either
//! misses or returns exactly the derived bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vectormap::{Config, EliminateConfig, VectorMap};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Key-derived value; even keys stay short (pooled copies), odd keys go
/// big (zero-copy arena views)
fn derived(i: usize) -> Vec<u8> {
    let len = if i % 2 == 0 { 40 } else { 600 };
    let byte = (i % 251) as u8;
    vec![byte; len]
}

fn key(i: usize) -> Vec<u8> {
    format!("ck-{}", i).into_bytes()
}

#[test]
fn test_readers_race_writers() {
    let map = VectorMap::with_config(
        1000,
        Config {
            buckets: 4,
            mem_cap: 16 * MIB,
            eliminate: Some(
                EliminateConfig::new(1, Duration::from_millis(20))
                    .with_step(Duration::from_millis(1)),
            ),
            debug: true,
            ..Config::default()
        },
    )
    .expect("valid config");

    const KEYS: usize = 64;
    for i in 0..KEYS {
        assert!(map.upsert(&key(i), &derived(i)));
    }

    let stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        for reader in 0..4 {
            let map = &map;
            let stop = &stop;
            scope.spawn(move || {
                let mut i = reader;
                while !stop.load(Ordering::Relaxed) {
                    let k = i % KEYS;
                    if let Some(value) = map.get(&key(k)) {
                        assert_eq!(
                            &*value,
                            &derived(k)[..],
                            "reader observed torn value for key {}",
                            k
                        );
                    }
                    i += 1;
                }
            });
        }

        // One writer churns updates; another cycles removals and re-inserts
        // to generate garbage for the background compactor
        {
            let map = &map;
            let stop = &stop;
            scope.spawn(move || {
                let mut i = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let k = i % KEYS;
                    map.update(&key(k), &derived(k));
                    i += 1;
                }
            });
        }
        {
            let map = &map;
            let stop = &stop;
            scope.spawn(move || {
                let mut i = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let k = i % KEYS;
                    map.remove(&key(k));
                    map.upsert(&key(k), &derived(k));
                    i += 7;
                    std::thread::sleep(Duration::from_micros(200));
                }
            });
        }

        std::thread::sleep(Duration::from_millis(800));
        stop.store(true, Ordering::Relaxed);
    });

    // Whatever survived must still verify
    for i in 0..KEYS {
        if let Some(value) = map.get(&key(i)) {
            assert_eq!(&*value, &derived(i)[..]);
        }
    }
}

#[test]
fn test_held_views_survive_background_compaction() {
    let map = VectorMap::with_config(
        100,
        Config {
            buckets: 1,
            mem_cap: 256 * KIB,
            eliminate: Some(
                EliminateConfig::new(1, Duration::from_millis(10))
                    .with_step(Duration::from_millis(1)),
            ),
            debug: true,
            ..Config::default()
        },
    )
    .expect("valid config");

    const KEYS: usize = 16;
    for i in 0..KEYS {
        assert!(map.upsert(&key(i), &derived(i)));
    }

    let stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        // Writer churns big values to build garbage fast, keeping the
        // compactor busy swapping generations
        {
            let map = &map;
            let stop = &stop;
            scope.spawn(move || {
                let mut i = 1usize;
                while !stop.load(Ordering::Relaxed) {
                    let k = i % KEYS;
                    if !map.update(&key(k), &derived(k)) {
                        // Full arena evicts on failed update; re-insert once
                        // the compactor has caught up
                        map.upsert(&key(k), &derived(k));
                    }
                    i += 2;
                }
            });
        }

        for reader in 0..3 {
            let map = &map;
            let stop = &stop;
            scope.spawn(move || {
                let mut i = reader;
                while !stop.load(Ordering::Relaxed) {
                    let k = i % KEYS;
                    if let Some(held) = map.get(&key(k)) {
                        // Hold the view across a few compaction windows
                        std::thread::sleep(Duration::from_millis(2));
                        assert_eq!(
                            &*held,
                            &derived(k)[..],
                            "held view invalidated for key {}",
                            k
                        );
                    }
                    i += 1;
                }
            });
        }

        std::thread::sleep(Duration::from_millis(700));
        stop.store(true, Ordering::Relaxed);
    });
}

#[test]
fn test_parallel_upserts_disjoint_keys() {
    let map = VectorMap::with_config(
        10_000,
        Config {
            buckets: 8,
            mem_cap: 32 * MIB,
            debug: true,
            ..Config::default()
        },
    )
    .expect("valid config");

    std::thread::scope(|scope| {
        for t in 0..4usize {
            let map = &map;
            scope.spawn(move || {
                for i in 0..1000usize {
                    let k = format!("t{}-{}", t, i);
                    assert!(map.upsert(k.as_bytes(), k.as_bytes()));
                }
            });
        }
    });

    assert_eq!(map.len(), 4000);
    for t in 0..4usize {
        for i in 0..1000usize {
            let k = format!("t{}-{}", t, i);
            let got = map.get(k.as_bytes()).expect("present");
            assert_eq!(&*got, k.as_bytes());
        }
    }
}
