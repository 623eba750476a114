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

//! Bounded selector for the coldest slots
//!
//! Eviction needs the n occupied slots with the lowest recency/frequency
//! without sorting the whole table. [`MinTop`] is a bounded max-heap: it
//! keeps the n smallest values seen, rejecting any candidate not below the
//! current kept maximum once full. One generic type serves both heat widths
//! (8-bit counters, 16-bit time buckets).
//!
//! The kept maximum is also the floor of every *surviving* slot's heat —
//! anything smaller would have displaced it — which is exactly the amount
//! the caller can safely subtract from all survivors when rebasing the
//! recency clock or aging frequency counters.
//!
//! Ordering among equal values is not part of the contract.

use std::collections::BinaryHeap;

/// Per-slot heat: the value eviction ranks by
pub trait HeatValue: Copy + Ord + Default + Send + Sync + 'static {
    /// The coldest possible value
    const ZERO: Self;

    fn saturating_sub(self, rhs: Self) -> Self;
    fn as_u32(self) -> u32;
    fn from_u32_lossy(v: u32) -> Self;
}

impl HeatValue for u8 {
    const ZERO: Self = 0;

    fn saturating_sub(self, rhs: Self) -> Self {
        u8::saturating_sub(self, rhs)
    }

    fn as_u32(self) -> u32 {
        self as u32
    }

    fn from_u32_lossy(v: u32) -> Self {
        v.min(u8::MAX as u32) as u8
    }
}

impl HeatValue for u16 {
    const ZERO: Self = 0;

    fn saturating_sub(self, rhs: Self) -> Self {
        u16::saturating_sub(self, rhs)
    }

    fn as_u32(self) -> u32 {
        self as u32
    }

    fn from_u32_lossy(v: u32) -> Self {
        v.min(u16::MAX as u32) as u16
    }
}

/// An occupied slot and its heat at selection time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<V> {
    pub group: u32,
    pub slot: u8,
    pub value: V,
}

#[derive(PartialEq, Eq)]
struct HeapEntry<V: HeatValue>(Candidate<V>);

impl<V: HeatValue> Ord for HeapEntry<V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Value first; slot coordinates only to keep the order total
        self.0
            .value
            .cmp(&other.0.value)
            .then(self.0.group.cmp(&other.0.group))
            .then(self.0.slot.cmp(&other.0.slot))
    }
}

impl<V: HeatValue> PartialOrd for HeapEntry<V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the `cap` smallest candidates offered
pub struct MinTop<V: HeatValue> {
    heap: BinaryHeap<HeapEntry<V>>,
    cap: usize,
}

impl<V: HeatValue> MinTop<V> {
    pub fn new(cap: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(cap),
            cap,
        }
    }

    /// Offer a candidate; returns whether it was kept
    pub fn offer(&mut self, c: Candidate<V>) -> bool {
        if self.cap == 0 {
            return false;
        }
        if self.heap.len() < self.cap {
            self.heap.push(HeapEntry(c));
            return true;
        }
        let mut top = self.heap.peek_mut().expect("non-empty at capacity");
        if c.value < top.0.value {
            *top = HeapEntry(c);
            true
        } else {
            false
        }
    }

    /// Once full with all-zero heat nothing colder can exist; callers may
    /// stop scanning.
    pub fn saturated_at_zero(&self) -> bool {
        self.heap.len() == self.cap
            && self
                .heap
                .peek()
                .map(|e| e.0.value == V::ZERO)
                .unwrap_or(false)
    }

    /// The kept maximum: a lower bound on every surviving slot's heat
    pub fn floor(&self) -> V {
        self.heap.peek().map(|e| e.0.value).unwrap_or(V::ZERO)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn into_candidates(self) -> Vec<Candidate<V>> {
        self.heap.into_iter().map(|e| e.0).collect()
    }
}
