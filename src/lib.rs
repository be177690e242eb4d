//! openhashset_rs: a striped concurrent open-addressing hash set with optimistic (seqlock) reads.
//!
//! The set is split into a fixed number of sections chosen at construction. Each section is a
//! linear-probing slot array with its own lock and its own resize lifecycle, so writers on
//! different sections never contend, and readers only fall back to a shared lock when a writer
//! touched their section mid-read. Values are stored inline in the slot arrays; there is no
//! per-entry allocation.
//!
//! Values must be plain `Copy` data: lock-free readers copy slots out of memory a writer may be
//! changing and only trust the copy once the section's version stamp validates.
//!
//! ```
//! use openhashset_rs::ConcurrentOpenHashSet;
//!
//! let set = ConcurrentOpenHashSet::new();
//! assert!(set.add(7u64));
//! assert!(!set.add(7u64));
//! assert!(set.contains(&7));
//! assert!(set.remove(&7));
//! assert!(set.is_empty());
//! ```

use std::fmt;
use std::hash::{BuildHasher, Hash};

use ahash::RandomState;
use crossbeam_utils::CachePadded;

mod config;
mod error;
mod hash;
mod section;
mod stamped_lock;

pub use config::{
    Config, Layout, DEFAULT_CONCURRENCY_LEVEL, DEFAULT_EXPECTED_ITEMS, MAP_FILL_FACTOR,
};
pub use error::{HashSetError, Result};
pub use hash::ceil_pow2;

use config::DEFAULT_LAYOUT;
use section::Section;

// ================================================================================================
// MAIN SET STRUCTURE
// ================================================================================================

/// Concurrent hash set of `Copy` values, sharded into independently locked sections.
pub struct ConcurrentOpenHashSet<V, S = RandomState> {
    sections: Box<[CachePadded<Section<V>>]>,
    hasher: S,
}

// ================================================================================================
// CONSTRUCTORS
// ================================================================================================

impl<V: Copy + Eq + Hash> ConcurrentOpenHashSet<V, RandomState> {
    /// Create a set sized for [`DEFAULT_EXPECTED_ITEMS`] values over
    /// [`DEFAULT_CONCURRENCY_LEVEL`] sections.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Create a set sized for `expected_items` values with the default concurrency level.
    pub fn with_expected_items(expected_items: usize) -> Result<Self> {
        Self::with_config_and_hasher(
            Config::default().expected_items(expected_items),
            RandomState::new(),
        )
    }

    /// Create a set sized for `expected_items` values split over `concurrency_level` sections.
    ///
    /// Both values must be non-zero and `expected_items >= concurrency_level`. A concurrency
    /// level that is not a power of two is rounded up.
    pub fn with_capacity_and_concurrency(
        expected_items: usize,
        concurrency_level: usize,
    ) -> Result<Self> {
        Self::with_config_and_hasher(
            Config::new(expected_items, concurrency_level),
            RandomState::new(),
        )
    }
}

impl<V: Copy + Eq + Hash, S: BuildHasher> ConcurrentOpenHashSet<V, S> {
    /// Create a default-sized set using the provided hasher.
    ///
    /// Changing the hasher of an existing set is not supported because every stored value's
    /// bucket depends on it.
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_layout(DEFAULT_LAYOUT, hasher)
    }

    /// Create a set from an explicit [`Config`] and hasher.
    pub fn with_config_and_hasher(config: Config, hasher: S) -> Result<Self> {
        let layout = config.validate()?;
        Ok(Self::from_layout(layout, hasher))
    }

    fn from_layout(layout: Layout, hasher: S) -> Self {
        let sections = (0..layout.sections)
            .map(|_| CachePadded::new(Section::new(layout.section_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        tracing::debug!(
            sections = layout.sections,
            section_capacity = layout.section_capacity,
            "created concurrent open hash set"
        );
        Self { sections, hasher }
    }

    // ============================================================================================
    // PUBLIC API METHODS
    // ============================================================================================

    /// Whether `value` is in the set.
    ///
    /// Lock-free unless a writer is active on the value's section.
    pub fn contains(&self, value: &V) -> bool {
        let h = hash::hash_value(&self.hasher, value);
        self.section_for(h).contains(value, h)
    }

    /// Insert `value`. Returns `true` if it was inserted, `false` if it was already present.
    ///
    /// # Panics
    ///
    /// Panics if the section has to grow and its doubled slot array cannot be allocated. Use
    /// [`try_add`](Self::try_add) to handle that case.
    pub fn add(&self, value: V) -> bool {
        match self.try_add(value) {
            Ok(inserted) => inserted,
            Err(err) => panic!("concurrent open hash set: {err}"),
        }
    }

    /// Insert `value`, reporting a failed section resize instead of panicking.
    ///
    /// On error the set is unchanged.
    pub fn try_add(&self, value: V) -> Result<bool> {
        let h = hash::hash_value(&self.hasher, &value);
        self.section_for(h).add(value, h)
    }

    /// Remove `value`. Returns `true` if it was present.
    pub fn remove(&self, value: &V) -> bool {
        let h = hash::hash_value(&self.hasher, value);
        self.section_for(h).remove(value, h)
    }

    /// Number of values in the set.
    ///
    /// Sums the sections one after the other; with concurrent writers the result is not a
    /// snapshot of the whole set.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.size()).sum()
    }

    /// Returns true if no section holds a value.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.size() == 0)
    }

    /// Total number of buckets across all sections.
    pub fn capacity(&self) -> usize {
        self.sections.iter().map(|s| s.capacity()).sum()
    }

    /// Number of sections (the concurrency level rounded up to a power of two).
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Remove every value. Section capacities are kept.
    pub fn clear(&self) {
        for section in self.sections.iter() {
            section.clear();
        }
    }

    /// Call `f` once for every value, section by section.
    ///
    /// Each section is read as a consistent snapshot: buckets are first copied optimistically,
    /// and if a concurrent writer invalidates that pass the section is copied again under its
    /// shared lock. Every value present in the snapshot is visited exactly once. Different
    /// sections may be observed at different times. No lock is held while `f` runs, so `f` may
    /// use the set.
    pub fn for_each<F: FnMut(V)>(&self, mut f: F) {
        let mut buf = Vec::new();
        for section in self.sections.iter() {
            buf.clear();
            section.snapshot_into(&mut buf);
            buf.iter().copied().for_each(&mut f);
        }
    }

    /// Copy of the values currently in the set.
    pub fn values(&self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len());
        for section in self.sections.iter() {
            section.snapshot_into(&mut values);
        }
        values
    }

    /// Iterator over a copy of the values at the moment of call.
    pub fn iter(&self) -> std::vec::IntoIter<V> {
        self.values().into_iter()
    }

    #[inline(always)]
    fn section_for(&self, h: u64) -> &Section<V> {
        &self.sections[hash::section_index(h, self.sections.len())]
    }
}

// ================================================================================================
// TRAIT IMPLEMENTATIONS
// ================================================================================================

impl<V: Copy + Eq + Hash, S: BuildHasher + Default> Default for ConcurrentOpenHashSet<V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<V: Copy + Eq + Hash, S: BuildHasher> fmt::Debug for ConcurrentOpenHashSet<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentOpenHashSet")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("sections", &self.section_count())
            .finish()
    }
}

impl<V: Copy + Eq + Hash, S: BuildHasher + Default> FromIterator<V>
    for ConcurrentOpenHashSet<V, S>
{
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        let set = Self::default();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl<V: Copy + Eq + Hash, S: BuildHasher> Extend<V> for ConcurrentOpenHashSet<V, S> {
    fn extend<T: IntoIterator<Item = V>>(&mut self, iter: T) {
        for value in iter {
            self.add(value);
        }
    }
}

impl<'a, V: Copy + Eq + Hash, S: BuildHasher> IntoIterator for &'a ConcurrentOpenHashSet<V, S> {
    type Item = V;
    type IntoIter = std::vec::IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hash code equal to the value itself, so tests can steer values into sections.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = (self.0 << 8) | b as u64;
            }
        }

        fn write_u64(&mut self, n: u64) {
            self.0 = n;
        }
    }

    type IdentitySet = ConcurrentOpenHashSet<u64, BuildHasherDefault<IdentityHasher>>;

    fn section_of(set: &IdentitySet, v: u64) -> usize {
        hash::section_index(hash::hash_value(&set.hasher, &v), set.section_count())
    }

    #[test]
    fn try_add_reports_failed_resize() {
        let set = IdentitySet::with_config_and_hasher(Config::new(16, 16), Default::default())
            .unwrap();
        // One bucket per section with a zero threshold: the first insert anywhere must grow.
        assert_eq!(set.capacity(), 16);

        section::limit_table_capacity(1);
        assert_eq!(
            set.try_add(7),
            Err(HashSetError::AllocationFailed { capacity: 2 })
        );
        assert!(!set.contains(&7));
        assert!(set.is_empty());
        assert_eq!(set.capacity(), 16);

        section::limit_table_capacity(usize::MAX);
        assert_eq!(set.try_add(7), Ok(true));
        assert!(set.contains(&7));
        assert_eq!(set.capacity(), 17);
    }

    #[test]
    fn resize_is_local_to_one_section() {
        let set = IdentitySet::with_config_and_hasher(Config::new(256, 16), Default::default())
            .unwrap();
        assert_eq!(set.section_count(), 16);
        for s in set.sections.iter() {
            assert_eq!(s.capacity(), 32);
            assert_eq!(s.resize_threshold(), 21);
        }

        let target = 3;
        let mut picked = Vec::new();
        let mut v = 0u64;
        while picked.len() < 22 {
            if section_of(&set, v) == target {
                picked.push(v);
            }
            v += 1;
        }

        for &v in &picked[..21] {
            assert!(set.add(v));
        }
        assert_eq!(set.sections[target].capacity(), 32);
        assert_eq!(set.sections[target].used_buckets(), 21);

        assert!(set.add(picked[21]));
        assert_eq!(set.sections[target].capacity(), 64);
        assert_eq!(set.sections[target].resize_threshold(), 42);
        for (i, s) in set.sections.iter().enumerate() {
            if i != target {
                assert_eq!(s.capacity(), 32);
            }
        }
        assert_eq!(set.capacity(), 15 * 32 + 64);
        for v in &picked {
            assert!(set.contains(v));
        }
    }

    #[test]
    fn tombstone_reuse_does_not_trigger_resize() {
        let set = IdentitySet::with_config_and_hasher(Config::new(256, 16), Default::default())
            .unwrap();
        let target = 0;
        let home = |v: u64| hash::hash_value(&set.hasher, &v) as usize & 31;

        // Three values of the target section sharing one home bucket.
        let mut by_home: std::collections::HashMap<usize, Vec<u64>> = Default::default();
        let trio = (0u64..)
            .filter(|&v| section_of(&set, v) == target)
            .find_map(|v| {
                let group = by_home.entry(home(v)).or_default();
                group.push(v);
                (group.len() == 3).then(|| group.clone())
            })
            .unwrap();
        let (a, b, c) = (trio[0], trio[1], trio[2]);

        assert!(set.add(a));
        assert!(set.add(c));
        // `c` sits right after `a`, so removing `a` leaves a tombstone.
        assert!(set.remove(&a));
        assert_eq!(set.sections[target].used_buckets(), 2);
        assert!(set.add(b));
        assert_eq!(set.sections[target].used_buckets(), 2);

        let others: Vec<u64> = (0u64..)
            .filter(|&v| section_of(&set, v) == target && !trio.contains(&v))
            .take(19)
            .collect();
        for &v in &others {
            assert!(set.add(v));
        }
        // 21 used buckets: exactly at the threshold, so no resize yet.
        assert_eq!(set.sections[target].used_buckets(), 21);
        assert_eq!(set.sections[target].capacity(), 32);
        assert_eq!(set.len(), 21);
    }

    #[test]
    fn default_set_layout() {
        let set: ConcurrentOpenHashSet<u32> = ConcurrentOpenHashSet::new();
        assert_eq!(set.section_count(), DEFAULT_CONCURRENCY_LEVEL);
        assert_eq!(set.capacity(), DEFAULT_CONCURRENCY_LEVEL * 32);
        assert!(set.is_empty());
    }

    #[test]
    fn debug_output() {
        let set: ConcurrentOpenHashSet<u32> = ConcurrentOpenHashSet::new();
        set.add(1);
        let s = format!("{set:?}");
        assert!(s.contains("len: 1"));
        assert!(s.contains("sections: 16"));
    }
}
