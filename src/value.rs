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

//! Values handed out by `get`
//!
//! A [`ValueRef`] is either a pooled copy (short values) or a zero-copy view
//! into the live arena holding a cloned generation handle (big and over-long
//! values). Dropping it releases the pooled buffer or the generation
//! reference exactly once; a generation swapped out by compaction stays
//! alive until every outstanding view drops.

use std::fmt;
use std::ops::Deref;

use crate::buffer::Buffer;
use crate::byte_pool::PooledBuf;

/// A value read from the cache
pub struct ValueRef {
    repr: Repr,
}

enum Repr {
    Pooled { buf: PooledBuf, len: usize },
    Shared { buf: Buffer, off: usize, len: usize },
}

impl ValueRef {
    pub(crate) fn pooled(buf: PooledBuf, len: usize) -> Self {
        Self {
            repr: Repr::Pooled { buf, len },
        }
    }

    pub(crate) fn shared(buf: Buffer, off: usize, len: usize) -> Self {
        Self {
            repr: Repr::Shared { buf, off, len },
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Pooled { len, .. } => *len,
            Repr::Shared { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this view points into the arena rather than a copy
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.repr, Repr::Shared { .. })
    }
}

impl Deref for ValueRef {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.repr {
            Repr::Pooled { buf, len } => &buf.as_slice()[..*len],
            Repr::Shared { buf, off, len } => buf.slice(*off, *len),
        }
    }
}

impl AsRef<[u8]> for ValueRef {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRef")
            .field("len", &self.len())
            .field("zero_copy", &self.is_zero_copy())
            .finish()
    }
}
