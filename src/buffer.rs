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

//! Reference-counted arena generation buffer
//!
//! One [`Buffer`] backs one arena generation. The table holds a handle, and
//! every zero-copy read holds another, so a generation swapped out by
//! compaction stays alive until the last outstanding read drops. Cloning a
//! handle is the acquire, dropping it is the release; the backing bytes are
//! freed by the final drop.
//!
//! The `Arc` does the actual freeing. A mirror count rides along purely to
//! keep the over-release/use-after-free panic observable: it must never be
//! seen `< 1` by a clone or `< 0` after a drop, and tests assert on it.
//!
//! # Access protocol
//!
//! The bytes live in an `UnsafeCell` because disjoint regions of one
//! allocation are read and written concurrently:
//!
//! - bytes past `tail` are written only before their record is published;
//! - short-value regions are rewritten in place only under the arena's
//!   in-place write lock, and are only ever read (copied out) under its read
//!   lock;
//! - big/over-long value regions are immutable from publication until the
//!   generation is dropped, which is what makes zero-copy reads sound.
//!
//! All access goes through the bounds-checked methods below; out-of-range
//! offsets panic (corruption, not a recoverable condition).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Cloneable handle to one arena generation's bytes
pub(crate) struct Buffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    bytes: UnsafeCell<Box<[u8]>>,
    /// Mirror of the handle count; exists for the underflow panic and tests
    refs: AtomicI32,
    /// Live-generation counter shared with the owning shard
    generations: Arc<AtomicUsize>,
}

// Concurrent access follows the module-level protocol; the cell itself is
// only reached through bounds-checked methods.
unsafe impl Send for BufferInner {}
unsafe impl Sync for BufferInner {}

impl Buffer {
    /// Allocate a zeroed generation of `size` bytes
    pub fn new(size: usize, generations: Arc<AtomicUsize>) -> Self {
        generations.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(BufferInner {
                bytes: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
                refs: AtomicI32::new(1),
                generations,
            }),
        }
    }

    /// Current handle count (statistics and tests)
    pub fn refs(&self) -> i32 {
        self.inner.refs.load(Ordering::Acquire)
    }

    /// Capacity in bytes
    pub fn len(&self) -> usize {
        // The box itself is never reallocated, only its contents change
        unsafe { (&(*self.inner.bytes.get())).len() }
    }

    #[inline]
    fn ptr(&self) -> *mut u8 {
        unsafe { (*self.inner.bytes.get()).as_mut_ptr() }
    }

    #[inline]
    fn check(&self, off: usize, len: usize) {
        let cap = self.len();
        if off.checked_add(len).map_or(true, |end| end > cap) {
            panic!(
                "buffer access out of range: off={} len={} cap={}",
                off, len, cap
            );
        }
    }

    /// Borrow `len` bytes at `off`
    #[inline]
    pub fn slice(&self, off: usize, len: usize) -> &[u8] {
        self.check(off, len);
        unsafe { std::slice::from_raw_parts(self.ptr().add(off), len) }
    }

    /// Overwrite the bytes at `off` with `src`
    #[inline]
    pub fn write(&self, off: usize, src: &[u8]) {
        self.check(off, src.len());
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr().add(off), src.len());
        }
    }

    /// Write consecutive segments starting at `off`; returns the end offset
    #[inline]
    pub fn write_vectored(&self, off: usize, parts: &[&[u8]]) -> usize {
        let mut at = off;
        for part in parts {
            self.write(at, part);
            at += part.len();
        }
        at
    }

    /// Store a little-endian u32 at `off`
    #[inline]
    pub fn store_u32(&self, off: usize, v: u32) {
        self.write(off, &v.to_le_bytes());
    }

    /// Load a little-endian u32 from `off`
    #[inline]
    pub fn load_u32(&self, off: usize) -> u32 {
        let b = self.slice(off, 4);
        u32::from_le_bytes(b.try_into().expect("u32 slice"))
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        let prev = self.inner.refs.fetch_add(1, Ordering::AcqRel);
        if prev < 1 {
            panic!("inconsistent buffer reference count: {}", prev + 1);
        }
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let prev = self.inner.refs.fetch_sub(1, Ordering::AcqRel);
        if prev < 1 {
            panic!("inconsistent buffer reference count: {}", prev - 1);
        }
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.generations.fetch_sub(1, Ordering::Relaxed);
    }
}
