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

//! Control-byte group matching
//!
//! The table's metadata is one byte per slot, grouped 16 at a time. Probing
//! compares a 7-bit tag against all 16 bytes of a group in one batched
//! comparison and walks the resulting bitmask low-bit-first.
//!
//! Two implementations produce bit-identical masks: an SSE2 compare+movemask
//! on x86_64 and a portable scalar loop. The active one is chosen once at
//! startup by a runtime feature probe, not at compile time, so both stay
//! honest and testable on the same build.

use std::sync::OnceLock;

/// Slots per control group
pub const GROUP_SIZE: usize = 16;

/// Rehash threshold: average occupied+tombstoned slots per group
pub const MAX_AVG_GROUP_LOAD: u32 = 14;

/// Never-written slot. High bit set so it can never collide with a 7-bit
/// tag; probes stop at the first group containing one.
pub const EMPTY: u8 = 0x80;

/// Deleted-but-not-reclaimed slot. Does not stop probes.
pub const TOMBSTONE: u8 = 0xFE;

/// Which matcher implementation is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// SSE2 compare + movemask
    Vector,
    /// Byte-at-a-time scalar loop
    Scalar,
}

/// The matcher selected by the startup feature probe
pub fn active_matcher() -> MatcherKind {
    static ACTIVE: OnceLock<MatcherKind> = OnceLock::new();
    *ACTIVE.get_or_init(probe)
}

#[cfg(target_arch = "x86_64")]
fn probe() -> MatcherKind {
    if std::arch::is_x86_feature_detected!("sse2") {
        MatcherKind::Vector
    } else {
        MatcherKind::Scalar
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe() -> MatcherKind {
    MatcherKind::Scalar
}

/// Bitmask of slots whose control byte equals `tag`; bit i = slot i
#[inline]
pub fn match_tag(group: &[u8; GROUP_SIZE], tag: u8) -> u16 {
    match active_matcher() {
        #[cfg(target_arch = "x86_64")]
        MatcherKind::Vector => unsafe { match_tag_sse2(group, tag) },
        #[cfg(not(target_arch = "x86_64"))]
        MatcherKind::Vector => match_tag_scalar(group, tag),
        MatcherKind::Scalar => match_tag_scalar(group, tag),
    }
}

/// Bitmask of EMPTY slots in the group
#[inline]
pub fn match_empty(group: &[u8; GROUP_SIZE]) -> u16 {
    match_tag(group, EMPTY)
}

/// Pop the lowest set bit and return its slot number. `mask` must be
/// non-zero.
#[inline]
pub fn next_match(mask: &mut u16) -> usize {
    let slot = mask.trailing_zeros() as usize;
    *mask &= *mask - 1;
    slot
}

pub(crate) fn match_tag_scalar(group: &[u8; GROUP_SIZE], tag: u8) -> u16 {
    let mut mask = 0u16;
    for (i, &b) in group.iter().enumerate() {
        if b == tag {
            mask |= 1 << i;
        }
    }
    mask
}

/// # Safety
///
/// Requires SSE2, which the startup probe guarantees before this is called.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub(crate) unsafe fn match_tag_sse2(group: &[u8; GROUP_SIZE], tag: u8) -> u16 {
    use std::arch::x86_64::*;

    let data = _mm_loadu_si128(group.as_ptr() as *const __m128i);
    let needle = _mm_set1_epi8(tag as i8);
    let cmp = _mm_cmpeq_epi8(data, needle);
    _mm_movemask_epi8(cmp) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn reference(group: &[u8; GROUP_SIZE], tag: u8) -> u16 {
        let mut mask = 0u16;
        for i in 0..GROUP_SIZE {
            if group[i] == tag {
                mask |= 1 << i;
            }
        }
        mask
    }

    #[test]
    fn test_match_tag_basic() {
        let mut group = [EMPTY; GROUP_SIZE];
        group[0] = 0x11;
        group[5] = 0x11;
        group[15] = 0x11;
        assert_eq!(match_tag(&group, 0x11), (1 << 0) | (1 << 5) | (1 << 15));
        assert_eq!(match_tag(&group, 0x22), 0);
    }

    #[test]
    fn test_match_empty_ignores_tombstones() {
        let mut group = [EMPTY; GROUP_SIZE];
        group[1] = TOMBSTONE;
        group[2] = 0x01;
        let mask = match_empty(&group);
        assert_eq!(mask & (1 << 1), 0);
        assert_eq!(mask & (1 << 2), 0);
        assert_eq!(mask.count_ones() as usize, GROUP_SIZE - 2);

        let full = [TOMBSTONE; GROUP_SIZE];
        assert_eq!(match_empty(&full), 0);
    }

    #[test]
    fn test_next_match_low_bit_first() {
        let mut mask: u16 = (1 << 3) | (1 << 7) | (1 << 12);
        assert_eq!(next_match(&mut mask), 3);
        assert_eq!(next_match(&mut mask), 7);
        assert_eq!(next_match(&mut mask), 12);
        assert_eq!(mask, 0);
    }

    /// Both implementations must produce identical masks on the same inputs.
    #[test]
    fn test_vector_scalar_conformance() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let mut group = [0u8; GROUP_SIZE];
            rng.fill(&mut group[..]);
            let tag: u8 = rng.gen();

            let scalar = match_tag_scalar(&group, tag);

            #[cfg(target_arch = "x86_64")]
            if std::arch::is_x86_feature_detected!("sse2") {
                let vector = unsafe { match_tag_sse2(&group, tag) };
                assert_eq!(scalar, vector, "group={:?} tag={:#x}", group, tag);
            }

            assert_eq!(scalar, reference(&group, tag));
        }
    }

    #[test]
    fn test_active_matcher_is_stable() {
        let first = active_matcher();
        assert_eq!(first, active_matcher());
    }
}
