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

//! Arena record storage
//!
//! One [`KvHolder`] owns the packed `(key, value)` records of one table
//! generation. Records are appended at `tail` and never moved; deletion only
//! adjusts accounting, and bytes are reclaimed by building a fresh
//! generation during compaction.
//!
//! # Record format
//!
//! ```text
//! key(16) | header(4) | [explicit len(4)] | value bytes, padded to 4
//! ```
//!
//! Slot index word (lives in the table, one per slot):
//!
//! ```text
//! bit 31    : long-value flag
//! bits 24-30: capacity class (short) or high size bits (big)
//! bits 0-23 : key byte offset / 4
//! ```
//!
//! Value header word (little-endian, after the key):
//!
//! ```text
//! bits 24-31: low size byte
//! bits 0-23 : value byte offset / 4
//! ```
//!
//! Three value classes:
//! - short (`len <= 127`): flag clear, index field is the capacity in words,
//!   header byte is the exact size. Updates that still fit the capacity
//!   rewrite in place.
//! - big (`128 <= len <= 32767`): flag set, size packed as
//!   `field << 8 | header byte`.
//! - over-long (`len >= 32768`): flag set, packed size is 0 (impossible for
//!   a big record) and a 4-byte explicit length precedes the value.
//!
//! All encode/decode is bit-exact; offsets are word offsets, so one arena
//! addresses at most 64 MiB. Offset 0 is reserved, which keeps the zero slot
//! index usable as the vacant sentinel.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::Buffer;
use crate::hash::{KeyDigest, DIGEST_LEN};

/// Fixed bytes per record: 16-byte key + 4-byte value header
pub(crate) const RECORD_OVERHEAD: u32 = 20;

/// Reserved bytes at the arena front so offset 0 is never a valid record
pub(crate) const HOLDER_RESERVE: u32 = 4;

/// First length that no longer fits the short class
pub(crate) const OVER_SHORT_SIZE: u32 = 1 << 7;

/// First length that needs an explicit length prefix
pub(crate) const OVER_LONG_SIZE: u32 = 1 << 15;

/// Hard ceiling on a single value
pub(crate) const MAX_VALUE_SIZE: u32 = 8 * 1024 * 1024;

/// Fill fraction beyond which inserts are refused
const MAX_FILL_RATE: f32 = 0.95;

const IDX_TYPE_MASK: u32 = 0x8000_0000;
const IDX_FIELD_MASK: u32 = 0x7F00_0000;
const IDX_OFFSET_MASK: u32 = 0x00FF_FFFF;

const HDR_SIZE_SHIFT: u32 = 24;

/// Round a value length up to its 4-byte capacity class
#[inline]
pub(crate) fn cap4(len: u32) -> u32 {
    (len + 3) & !3
}

/// Packed per-slot record locator; `0` means vacant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotIdx(u32);

impl SlotIdx {
    pub const VACANT: SlotIdx = SlotIdx(0);

    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        SlotIdx(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn pack(long: bool, field: u32, key_off: u32) -> Self {
        debug_assert!(field <= 0x7F);
        debug_assert_eq!(key_off & 3, 0);
        debug_assert!(key_off / 4 <= IDX_OFFSET_MASK);
        let mut raw = key_off / 4;
        raw |= field << 24;
        if long {
            raw |= IDX_TYPE_MASK;
        }
        SlotIdx(raw)
    }

    #[inline]
    pub fn is_vacant(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_long(self) -> bool {
        self.0 & IDX_TYPE_MASK != 0
    }

    /// Capacity class in words (short) or high size bits (big)
    #[inline]
    pub fn field(self) -> u32 {
        (self.0 & IDX_FIELD_MASK) >> 24
    }

    /// Byte offset of the record's key
    #[inline]
    pub fn key_off(self) -> u32 {
        (self.0 & IDX_OFFSET_MASK) * 4
    }
}

#[inline]
fn pack_header(small: u32, val_off: u32) -> u32 {
    debug_assert!(small <= 0xFF);
    debug_assert_eq!(val_off & 3, 0);
    debug_assert!(val_off / 4 <= IDX_OFFSET_MASK);
    (small << HDR_SIZE_SHIFT) | (val_off / 4)
}

#[inline]
fn header_small(header: u32) -> u32 {
    header >> HDR_SIZE_SHIFT
}

#[inline]
fn header_val_off(header: u32) -> u32 {
    (header & IDX_OFFSET_MASK) * 4
}

/// A record's decoded value location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueSpec {
    /// In-place-updatable; `cap` is the reusable byte capacity
    Short { off: u32, len: u32, cap: u32 },
    Big { off: u32, len: u32 },
    /// `off` points past the explicit length prefix
    OverLong { off: u32, len: u32 },
}

impl ValueSpec {
    /// Byte range of the value data
    #[inline]
    pub fn data(self) -> (u32, u32) {
        match self {
            ValueSpec::Short { off, len, .. } => (off, len),
            ValueSpec::Big { off, len } => (off, len),
            ValueSpec::OverLong { off, len } => (off, len),
        }
    }

    /// Bytes this value holds against the accounted budget
    #[inline]
    pub fn accounted(self) -> u32 {
        match self {
            ValueSpec::Short { cap, .. } => cap,
            ValueSpec::Big { len, .. } => cap4(len),
            ValueSpec::OverLong { len, .. } => cap4(len) + 4,
        }
    }

    #[inline]
    pub fn is_zero_copy(self) -> bool {
        !matches!(self, ValueSpec::Short { .. })
    }
}

/// Size-class encoding of a value length
#[derive(Debug, Clone, Copy)]
pub(crate) struct Encoded {
    pub long: bool,
    pub field: u32,
    pub small: u32,
    /// Accounted bytes, including the over-long length prefix
    pub vcap: u32,
}

#[inline]
pub(crate) fn encode_class(len: u32) -> Encoded {
    if len < OVER_SHORT_SIZE {
        Encoded {
            long: false,
            field: cap4(len) / 4,
            small: len,
            vcap: cap4(len),
        }
    } else if len < OVER_LONG_SIZE {
        Encoded {
            long: true,
            field: len >> 8,
            small: len & 0xFF,
            vcap: cap4(len),
        }
    } else {
        Encoded {
            long: true,
            field: 0,
            small: 0,
            vcap: cap4(len) + 4,
        }
    }
}

/// A value freshly appended past the old tail, ready to be republished
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppendedValue {
    /// Offset the header must point at (the prefix, for over-long values)
    pub val_off: u32,
    pub enc: Encoded,
}

/// The arena: one generation of packed records
pub(crate) struct KvHolder {
    buffer: Buffer,
    /// Guards short in-place overwrites and slot-index/header republishing
    /// against concurrent key/header/short-value reads
    inplace: RwLock<()>,
    cap: u32,
    limit: u32,
    tail: AtomicU32,
    val_used: AtomicU32,
    items: AtomicU32,
}

impl KvHolder {
    pub fn new(cap: u32, generations: Arc<AtomicUsize>) -> Self {
        Self {
            buffer: Buffer::new(cap as usize, generations),
            inplace: RwLock::new(()),
            cap,
            limit: (cap as f32 * MAX_FILL_RATE) as u32,
            tail: AtomicU32::new(HOLDER_RESERVE),
            val_used: AtomicU32::new(0),
            items: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    #[inline]
    pub fn inplace(&self) -> &RwLock<()> {
        &self.inplace
    }

    #[inline]
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Insert refusal watermark
    #[inline]
    pub fn at_fill_limit(&self) -> bool {
        self.tail() >= self.limit
    }

    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn val_used(&self) -> u32 {
        self.val_used.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn items(&self) -> u32 {
        self.items.load(Ordering::Relaxed)
    }

    /// Record key bytes
    #[inline]
    pub fn key_bytes(&self, idx: SlotIdx) -> &[u8] {
        self.buffer.slice(idx.key_off() as usize, DIGEST_LEN)
    }

    /// Record header word
    #[inline]
    pub fn header(&self, idx: SlotIdx) -> u32 {
        self.buffer.load_u32(idx.key_off() as usize + DIGEST_LEN)
    }

    #[inline]
    fn set_header(&self, idx: SlotIdx, header: u32) {
        self.buffer
            .store_u32(idx.key_off() as usize + DIGEST_LEN, header);
    }

    /// Decode a record's value location, resolving the over-long prefix
    pub fn value_spec(&self, idx: SlotIdx, header: u32) -> ValueSpec {
        let voff = header_val_off(header);
        let small = header_small(header);
        if !idx.is_long() {
            return ValueSpec::Short {
                off: voff,
                len: small,
                cap: idx.field() * 4,
            };
        }
        let packed = (idx.field() << 8) | small;
        if packed < OVER_SHORT_SIZE {
            let len = self.buffer.load_u32(voff as usize);
            ValueSpec::OverLong {
                off: voff + 4,
                len,
            }
        } else {
            ValueSpec::Big {
                off: voff,
                len: packed,
            }
        }
    }

    /// Borrow a value's bytes
    #[inline]
    pub fn value_bytes(&self, spec: ValueSpec) -> &[u8] {
        let (off, len) = spec.data();
        self.buffer.slice(off as usize, len as usize)
    }

    /// Append a whole record. Fails without mutating state when it does not
    /// fit.
    pub fn append_record(
        &self,
        key: &KeyDigest,
        total_len: u32,
        parts: &[&[u8]],
    ) -> Option<SlotIdx> {
        let enc = encode_class(total_len);
        let tail = self.tail();
        let need = RECORD_OVERHEAD + enc.vcap;
        if tail as u64 + need as u64 > self.cap as u64 {
            return None;
        }

        let key_off = tail;
        let val_off = tail + RECORD_OVERHEAD;
        self.buffer.write(key_off as usize, key);
        if total_len >= OVER_LONG_SIZE {
            self.buffer.store_u32(val_off as usize, total_len);
            self.buffer.write_vectored(val_off as usize + 4, parts);
        } else {
            self.buffer.write_vectored(val_off as usize, parts);
        }
        self.buffer
            .store_u32(key_off as usize + DIGEST_LEN, pack_header(enc.small, val_off));

        self.items.fetch_add(1, Ordering::Relaxed);
        self.val_used.fetch_add(enc.vcap, Ordering::Relaxed);
        self.tail.store(tail + need, Ordering::Relaxed);
        Some(SlotIdx::pack(enc.long, enc.field, key_off))
    }

    /// Append only a value region (for updates of an existing record).
    /// The caller republishes the slot index and header under the in-place
    /// lock via [`KvHolder::relink`].
    pub fn append_value(&self, total_len: u32, parts: &[&[u8]]) -> Option<AppendedValue> {
        let enc = encode_class(total_len);
        let tail = self.tail();
        if tail as u64 + enc.vcap as u64 > self.cap as u64 {
            return None;
        }

        if total_len >= OVER_LONG_SIZE {
            self.buffer.store_u32(tail as usize, total_len);
            self.buffer.write_vectored(tail as usize + 4, parts);
        } else {
            self.buffer.write_vectored(tail as usize, parts);
        }

        self.val_used.fetch_add(enc.vcap, Ordering::Relaxed);
        self.tail.store(tail + enc.vcap, Ordering::Relaxed);
        Some(AppendedValue { val_off: tail, enc })
    }

    /// Point a record at a freshly appended value. Must be called under the
    /// in-place write lock; returns the new slot index the caller publishes.
    pub fn relink(&self, idx: SlotIdx, appended: AppendedValue) -> SlotIdx {
        let new_idx = SlotIdx::pack(appended.enc.long, appended.enc.field, idx.key_off());
        self.set_header(idx, pack_header(appended.enc.small, appended.val_off));
        new_idx
    }

    /// Rewrite a short value in place. Must be called under the in-place
    /// write lock; the existing capacity class is retained.
    pub fn write_in_place(&self, idx: SlotIdx, off: u32, total_len: u32, parts: &[&[u8]]) {
        debug_assert!(total_len < OVER_SHORT_SIZE);
        self.set_header(idx, pack_header(total_len, off));
        self.buffer.write_vectored(off as usize, parts);
    }

    /// Release a value's accounted bytes (record stays, bytes are reclaimed
    /// by the next compaction)
    #[inline]
    pub fn release_value(&self, spec: ValueSpec) {
        self.val_used.fetch_sub(spec.accounted(), Ordering::Relaxed);
    }

    /// Drop a whole record from the accounting
    pub fn del(&self, idx: SlotIdx) {
        if idx.is_vacant() {
            return;
        }
        let spec = self.value_spec(idx, self.header(idx));
        self.release_value(spec);
        self.items.fetch_sub(1, Ordering::Relaxed);
    }

    /// Bytes consumed, including reclaimable garbage
    #[inline]
    pub fn used(&self) -> u32 {
        self.tail()
    }

    /// Bytes attributable to live records
    #[inline]
    pub fn effective(&self) -> u32 {
        self.val_used() + self.items() * RECORD_OVERHEAD + HOLDER_RESERVE
    }

    /// `tail / cap`
    #[inline]
    pub fn mem_usage(&self) -> f32 {
        self.tail() as f32 / self.cap as f32
    }

    /// `live / cap`
    #[inline]
    pub fn items_mem_usage(&self) -> f32 {
        self.effective() as f32 / self.cap as f32
    }

    /// Reclaimable fraction of the arena
    #[inline]
    pub fn garbage_usage(&self) -> f32 {
        (self.tail() as f32 - self.effective() as f32) / self.cap as f32
    }

    /// Live fraction of the consumed bytes
    #[inline]
    pub fn mem_use_rate(&self) -> f32 {
        self.effective() as f32 / self.tail() as f32
    }
}
