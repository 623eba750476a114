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

//! Cache Operations Integration Tests

use rand::Rng;
use vectormap::{Config, VectorMap};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn debug_map(buckets: usize, mem_cap: u64) -> VectorMap {
    VectorMap::with_config(
        10_000,
        Config {
            buckets,
            mem_cap,
            debug: true,
            ..Config::default()
        },
    )
    .expect("valid debug config")
}

fn random_values(size: usize, count: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (0..size).map(|_| rng.gen::<u8>()).collect())
        .collect()
}

#[test]
fn test_round_trip_many_keys() {
    let values = random_values(100, 5000);
    let map = debug_map(16, 16 * MIB);

    for (i, value) in values.iter().enumerate() {
        let key = i.to_string();
        assert!(map.upsert(key.as_bytes(), value), "upsert {}", i);
    }
    assert_eq!(map.len(), values.len());

    for (i, value) in values.iter().enumerate() {
        let key = i.to_string();
        let got = map.get(key.as_bytes()).expect("present");
        assert_eq!(&*got, &value[..], "key {}", i);
    }
}

#[test]
fn test_update_replaces_value() {
    let map = debug_map(2, 1 * MIB);

    assert!(map.upsert(b"key", b"old"));
    assert_eq!(&*map.get(b"key").expect("present"), b"old");

    assert!(map.update(b"key", b"new"));
    assert_eq!(&*map.get(b"key").expect("present"), b"new");
}

#[test]
fn test_all_value_size_classes_round_trip() {
    let map = debug_map(1, 4 * MIB);

    for len in [0usize, 1, 127, 128, 255, 4096, 32767, 32768, 50_000] {
        let key = format!("size-{}", len);
        let value: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        assert!(map.upsert(key.as_bytes(), &value), "len {}", len);
        let got = map.get(key.as_bytes()).expect("present");
        assert_eq!(got.len(), len);
        assert_eq!(&*got, &value[..], "len {}", len);
    }
}

#[test]
fn test_vectored_update_concatenates_segments() {
    let map = debug_map(1, 1 * MIB);

    assert!(map.upsert(b"key", b"slice"));
    assert!(map.update_vectored(b"key", 8, &[b"new", b"slice"]));
    let got = map.get(b"key").expect("present");
    assert_eq!(&*got, b"newslice");

    // Large vectored updates cross into the zero-copy classes
    let half = vec![0xCD; 600];
    assert!(map.update_vectored(b"key", 1200, &[&half, &half]));
    let got = map.get(b"key").expect("present");
    assert_eq!(got.len(), 1200);
    assert!(got.iter().all(|&b| b == 0xCD));
}

#[test]
fn test_empty_value_round_trips() {
    let map = debug_map(1, 64 * KIB);
    assert!(map.upsert(b"empty", b""));
    let got = map.get(b"empty").expect("present");
    assert!(got.is_empty());
}

#[test]
fn test_remove_then_miss() {
    let map = debug_map(2, 1 * MIB);
    assert!(map.upsert(b"key", b"value"));
    assert_eq!(map.len(), 1);

    assert!(map.remove(b"key"));
    assert!(map.get(b"key").is_none());
    assert!(!map.contains_key(b"key"));
    assert_eq!(map.len(), 0);

    // Removing a missing key reports false and changes nothing
    assert!(!map.remove(b"key"));
    assert_eq!(map.len(), 0);
}

#[test]
fn test_contains_key() {
    let map = debug_map(2, 64 * KIB);
    assert!(!map.contains_key(b"a"));
    assert!(map.upsert(b"a", b"1"));
    assert!(map.contains_key(b"a"));
}

#[test]
fn test_counters_reflect_traffic() {
    let map = debug_map(2, 64 * KIB);
    assert!(map.upsert(b"a", b"1"));

    for _ in 0..10 {
        assert!(map.get(b"a").is_some());
    }
    for _ in 0..5 {
        assert!(map.get(b"missing").is_none());
    }

    assert_eq!(map.query_count(), 15);
    assert_eq!(map.miss_count(), 5);
}

#[test]
fn test_clear_then_reuse() {
    let map = debug_map(4, 1 * MIB);
    for i in 0..200u32 {
        assert!(map.upsert(format!("k{}", i).as_bytes(), b"v"));
    }
    map.clear();
    assert!(map.is_empty());
    assert_eq!(map.used_mem(), map.bucket_count() as u64 * 4);

    for i in 0..200u32 {
        assert!(map.upsert(format!("k{}", i).as_bytes(), b"w"));
    }
    assert_eq!(map.len(), 200);
    assert_eq!(&*map.get(b"k42").expect("present"), b"w");
}

#[test]
fn test_value_outlives_mutation_of_same_key() {
    let map = debug_map(1, 1 * MIB);
    let big = vec![0x11; 2048];
    assert!(map.upsert(b"key", &big));

    let held = map.get(b"key").expect("present");
    assert!(map.update(b"key", &vec![0x22; 2048]));

    // The held view still reads the bytes it captured
    assert_eq!(&*held, &big[..]);
    drop(held);

    let fresh = map.get(b"key").expect("present");
    assert!(fresh.iter().all(|&b| b == 0x22));
}
