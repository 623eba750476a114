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

//! Size-classed scratch-buffer pools
//!
//! Short values are returned to callers as copies rather than zero-copy
//! arena references, and those copies come out of fixed free lists so the
//! read path stays allocation-free in steady state. Four size classes cover
//! everything up to the short-value ceiling; larger requests fall through to
//! a plain allocation and are not pooled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use crossbeam::queue::ArrayQueue;

/// Pooled buffer size classes in bytes
const CLASSES: [usize; 4] = [16, 32, 64, 128];

/// Free-list depth per size class
const POOL_DEPTH: usize = 64;

/// The process-wide pool set
pub(crate) fn global() -> &'static BytePools {
    static POOLS: OnceLock<BytePools> = OnceLock::new();
    POOLS.get_or_init(BytePools::new)
}

/// Fixed free lists of scratch buffers, one queue per size class
pub(crate) struct BytePools {
    pools: [ArrayQueue<Box<[u8]>>; 4],
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl BytePools {
    fn new() -> Self {
        Self {
            pools: [
                ArrayQueue::new(POOL_DEPTH),
                ArrayQueue::new(POOL_DEPTH),
                ArrayQueue::new(POOL_DEPTH),
                ArrayQueue::new(POOL_DEPTH),
            ],
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn class_of(size: usize) -> Option<usize> {
        CLASSES.iter().position(|&c| size <= c)
    }

    /// A buffer with at least `size` bytes of capacity
    pub fn get(&self, size: usize) -> PooledBuf {
        match Self::class_of(size) {
            Some(class) => {
                let data = match self.pools[class].pop() {
                    Some(buf) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        buf
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        vec![0u8; CLASSES[class]].into_boxed_slice()
                    }
                };
                PooledBuf {
                    data: Some(data),
                    pooled: true,
                }
            }
            None => PooledBuf {
                data: Some(vec![0u8; size].into_boxed_slice()),
                pooled: false,
            },
        }
    }

    fn put(&self, buf: Box<[u8]>) {
        if let Some(class) = CLASSES.iter().position(|&c| c == buf.len()) {
            // Queue full: let the buffer drop
            let _ = self.pools[class].push(buf);
        }
    }

    /// (pool hits, pool misses) since process start
    #[cfg(test)]
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

/// A scratch buffer that returns itself to its pool on drop
pub(crate) struct PooledBuf {
    data: Option<Box<[u8]>>,
    pooled: bool,
}

impl PooledBuf {
    /// Full backing capacity, which may exceed the requested size
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_mut().expect("pooled buffer taken")
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref().expect("pooled buffer taken")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            if self.pooled {
                global().put(buf);
            }
        }
    }
}
