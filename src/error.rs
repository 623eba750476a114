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

//! Error types for vectormap
//!
//! Only construction and configuration can fail with an [`Error`]. Runtime
//! cache operations signal capacity exhaustion with `false`/`None` and never
//! return errors; internal invariant violations (reference-count underflow,
//! header-width overflow) panic because they indicate memory corruption, not
//! a retryable condition.

use thiserror::Error;

/// Result type alias for vectormap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vectormap construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bucket (shard) count of zero was requested in debug mode
    #[error("bucket count must be at least 1")]
    ZeroBuckets,

    /// Memory cap too small to give every shard a usable arena
    #[error("memory cap {got} bytes is too small for {buckets} buckets (minimum {min} bytes per shard)")]
    MemCapTooSmall { got: u64, buckets: usize, min: u64 },

    /// Eviction scheduler configured with no workers
    #[error("eviction scheduler needs at least 1 worker")]
    ZeroWorkers,

    /// Eviction scheduler cycle duration of zero
    #[error("eviction cycle duration must be non-zero")]
    ZeroCycle,

    /// Recency bucket granularity of zero
    #[error("lru unit time must be non-zero")]
    ZeroUnitTime,
}
