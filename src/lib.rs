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

//! # vectormap - sharded, self-evicting key-value cache engine
//!
//! A fixed-memory, concurrent byte cache built over a hand-managed arena
//! instead of language-native maps: open-addressed tables with batched
//! control-byte probing, packed record headers, reference-counted arena
//! generations for lock-free reads during background compaction, and
//! pluggable LRU/LFU eviction running concurrently with request traffic
//! under a strict memory budget.
//!
//! Data loss on eviction is expected and acceptable: this is a best-effort,
//! memory-bounded, single-process structure with no persistence, wire
//! protocol, or cross-shard transactions.
//!
//! ## Quick start
//!
//! ```rust
//! use vectormap::{Config, VectorMap};
//!
//! // Debug mode lifts the production clamps so examples stay small
//! let cache = VectorMap::with_config(
//!     1000,
//!     Config {
//!         buckets: 4,
//!         mem_cap: 4 * 1024 * 1024,
//!         debug: true,
//!         ..Config::default()
//!     },
//! )
//! .unwrap();
//!
//! assert!(cache.upsert(b"user:1", b"alice"));
//! let value = cache.get(b"user:1").unwrap();
//! assert_eq!(&*value, b"alice");
//! drop(value); // releases the read reference
//!
//! cache.remove(b"user:1");
//! assert!(!cache.contains_key(b"user:1"));
//! ```
//!
//! ## Modules
//!
//! - [`config`] - construction options, clamps, scheduler settings
//! - [`error`] - construction errors ([`Error`], [`Result`])
//! - [`version`] - version constants and build information
//!
//! Capacity failures at runtime are booleans, never errors: a `false`
//! `upsert` means "cache full, entry dropped" and shows up in
//! [`VectorMap::upsert_fail_count`].

// Use mimalloc as global allocator when the feature is enabled
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod error;
pub mod version;

mod buffer;
mod byte_pool;
mod group_match;
mod hash;
mod holder;
mod mintop;
mod policy;
mod router;
mod scheduler;
mod shard;
mod value;

pub use config::{Config, EliminateConfig, MapType};
pub use error::{Error, Result};
pub use router::{Stats, VectorMap};
pub use value::ValueRef;
