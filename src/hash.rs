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

//! Key hashing and probe addressing
//!
//! Every user key is reduced to a 128-bit SipHash-1-3 digest. The digest is
//! what the arena stores as the fixed-width key, so full-key comparison is a
//! 16-byte compare and rebuilds can re-derive a record's probe position from
//! the stored digest alone. The first 64-bit half routes the shard; the
//! second half splits into `h1` (57 bits, selects the starting group) and
//! `h2` (7 bits, the control-byte tag).

use std::hash::Hasher;

use siphasher::sip128::{Hasher128, SipHasher13};

/// Stored key width in bytes
pub const DIGEST_LEN: usize = 16;

/// The fixed-width stored key: a 128-bit digest of the user key
pub type KeyDigest = [u8; DIGEST_LEN];

// Fixed keys: the digest layout is part of the arena format, so hashing must
// be stable across instances of the same process image.
const SIP_KEY_0: u64 = 0x7969_6e67_6c69_616e;
const SIP_KEY_1: u64 = 0x6d61_7073_6861_7264;

const H2_BITS: u32 = 7;
const H2_MASK: u64 = (1 << H2_BITS) - 1;

/// Digest a user key into (stored key, shard half, probe half)
#[inline]
pub fn digest(key: &[u8]) -> (KeyDigest, u64, u64) {
    let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
    hasher.write(key);
    let h = hasher.finish128();

    let mut d = [0u8; DIGEST_LEN];
    d[..8].copy_from_slice(&h.h1.to_le_bytes());
    d[8..].copy_from_slice(&h.h2.to_le_bytes());
    (d, h.h1, h.h2)
}

/// Recover the (shard half, probe half) of a stored digest
#[inline]
pub fn digest_halves(d: &KeyDigest) -> (u64, u64) {
    let hi = u64::from_le_bytes(d[..8].try_into().expect("digest half"));
    let lo = u64::from_le_bytes(d[8..].try_into().expect("digest half"));
    (hi, lo)
}

/// Split the probe half into the group-selecting `h1` and the 7-bit tag `h2`
#[inline]
pub fn split_hash(lo: u64) -> (u64, u8) {
    (lo >> H2_BITS, (lo & H2_MASK) as u8)
}

/// Starting group for a probe sequence: multiply-shift modulo, cheaper than
/// an integer division and unbiased enough for power-law group counts
#[inline]
pub fn probe_start(h1: u64, groups: usize) -> usize {
    (((h1 as u32 as u64) * groups as u64) >> 32) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let (d1, hi1, lo1) = digest(b"some-key");
        let (d2, hi2, lo2) = digest(b"some-key");
        assert_eq!(d1, d2);
        assert_eq!(hi1, hi2);
        assert_eq!(lo1, lo2);

        let (d3, _, _) = digest(b"other-key");
        assert_ne!(d1, d3);
    }

    #[test]
    fn test_digest_halves_round_trip() {
        let (d, hi, lo) = digest(b"round-trip");
        let (hi2, lo2) = digest_halves(&d);
        assert_eq!(hi, hi2);
        assert_eq!(lo, lo2);
    }

    #[test]
    fn test_split_hash_tag_is_seven_bits() {
        for key in [b"a".as_slice(), b"bb", b"ccc", b"dddd"] {
            let (_, _, lo) = digest(key);
            let (h1, h2) = split_hash(lo);
            assert!(h2 < 128);
            assert_eq!(h1, lo >> 7);
        }
    }

    #[test]
    fn test_probe_start_in_range() {
        for groups in [1usize, 2, 7, 64, 1031] {
            for i in 0..1000u64 {
                let (_, _, lo) = digest(&i.to_le_bytes());
                let (h1, _) = split_hash(lo);
                assert!(probe_start(h1, groups) < groups);
            }
        }
    }
}
