//! Hash mixing, section routing and power-of-two sizing helpers.
//!
//! Every operation on the set hashes its value exactly once: the value's hash code comes from
//! the set's `BuildHasher`, [`mix`] spreads it into a 64-bit avalanche hash, the upper 32 bits
//! pick the section ([`section_index`]) and the lower bits pick the bucket inside the section
//! ([`bucket_index`]). Keeping the two decisions on disjoint bits avoids clustering when the
//! section count and the section capacity share factors.

use std::hash::{BuildHasher, Hash};

/// Multiplier of the mixer (MurmurHash2 64-bit constant).
pub(crate) const HASH_MIXER: u64 = 0xc6a4_a793_5bd1_e995;

/// Right shift applied between the two multiplications.
pub(crate) const HASH_SHIFT: u32 = 47;

/// Mix a raw hash code into a well distributed 64-bit hash.
#[inline(always)]
pub(crate) fn mix(hash_code: u64) -> u64 {
    let mut h = hash_code.wrapping_mul(HASH_MIXER);
    h ^= h >> HASH_SHIFT;
    h.wrapping_mul(HASH_MIXER)
}

/// Hash a value with the given hasher and mix the result.
#[inline(always)]
pub(crate) fn hash_value<V: Hash + ?Sized, S: BuildHasher>(hasher: &S, value: &V) -> u64 {
    mix(hasher.hash_one(value))
}

/// Section selected by the upper 32 bits of a mixed hash.
///
/// `sections` must be a power of two.
#[inline(always)]
pub(crate) fn section_index(hash: u64, sections: usize) -> usize {
    debug_assert!(sections.is_power_of_two());
    ((hash >> 32) as usize) & (sections - 1)
}

/// Bucket selected by the low bits of a mixed hash. `capacity` must be a power of two.
#[inline(always)]
pub(crate) fn bucket_index(hash: u64, capacity: usize) -> usize {
    (hash as usize) & (capacity - 1)
}

/// Smallest power of two that is greater than or equal to `n` (`0` maps to `1`).
///
/// Returns `None` when the result does not fit in a `usize`.
#[inline]
pub fn ceil_pow2(n: usize) -> Option<usize> {
    n.checked_next_power_of_two()
}
