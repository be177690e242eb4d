//! One independently locked shard of the set: a linear-probing slot array with tombstones.
//!
//! Readers take an optimistic stamp and copy slots out of the array without locking, escalating
//! to the shared lock when a writer shows up. Writers (`add`, `remove`, `clear`, rehash) hold the
//! exclusive lock for the whole operation.
//!
//! A rehash installs a new slot array and publishes the new capacity only after the array
//! pointer, so a reader never masks a bucket index with a capacity larger than the array it
//! holds. Replaced arrays are kept until the section is dropped because optimistic readers may
//! still be probing them.

use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::config::resize_threshold;
use crate::error::{HashSetError, Result};
use crate::hash::bucket_index;
use crate::stamped_lock::{StampedLock, INVALID_STAMP};

// ================================================================================================
// SLOTS
// ================================================================================================

/// State of one bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot<V> {
    /// Never used, or vacated at the end of a probe chain.
    Empty,
    /// Logically deleted; kept so probe chains running through it stay intact.
    Tombstone,
    /// Live value together with its mixed hash.
    Occupied { hash: u64, value: V },
}

impl<V: Eq> Slot<V> {
    #[inline(always)]
    fn holds(&self, value: &V, hash: u64) -> bool {
        match self {
            Slot::Occupied { hash: h, value: v } => *h == hash && v == value,
            _ => false,
        }
    }
}

/// Heap array of slots addressed through raw pointers so that optimistic readers and the writer
/// never hold Rust references to the same slot.
struct SlotTable<V> {
    slots: NonNull<[UnsafeCell<Slot<V>>]>,
}

// SAFETY: slots are only written under the section's exclusive lock; racy reads copy `V: Copy`
// data and are discarded unless the section stamp validates.
unsafe impl<V: Send> Send for SlotTable<V> {}
unsafe impl<V: Send + Sync> Sync for SlotTable<V> {}

impl<V: Copy> SlotTable<V> {
    fn new(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity), capacity)
    }

    fn try_new(capacity: usize) -> Result<Self> {
        #[cfg(test)]
        {
            if capacity > TABLE_CAPACITY_LIMIT.with(|limit| limit.get()) {
                return Err(HashSetError::AllocationFailed { capacity });
            }
        }
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| HashSetError::AllocationFailed { capacity })?;
        Ok(Self::from_vec(slots, capacity))
    }

    fn from_vec(mut slots: Vec<UnsafeCell<Slot<V>>>, capacity: usize) -> Self {
        slots.resize_with(capacity, || UnsafeCell::new(Slot::Empty));
        Self {
            slots: NonNull::from(Box::leak(slots.into_boxed_slice())),
        }
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn as_ptr(&self) -> *mut UnsafeCell<Slot<V>> {
        self.slots.cast::<UnsafeCell<Slot<V>>>().as_ptr()
    }

    /// Read a slot. Callers hold the section lock (shared or exclusive).
    #[inline(always)]
    fn load(&self, bucket: usize) -> Slot<V> {
        debug_assert!(bucket < self.len());
        // SAFETY: in bounds, and no writer can run while the caller holds the lock.
        unsafe { load_locked(self.as_ptr(), bucket) }
    }

    /// Write a slot. Callers hold the exclusive section lock.
    #[inline(always)]
    fn store(&self, bucket: usize, slot: Slot<V>) {
        debug_assert!(bucket < self.len());
        // SAFETY: in bounds; volatile because optimistic readers may be copying this slot.
        unsafe { ptr::write_volatile(UnsafeCell::raw_get(self.as_ptr().add(bucket)), slot) }
    }

    fn fill_empty(&self) {
        for bucket in 0..self.len() {
            self.store(bucket, Slot::Empty);
        }
    }

    /// Insert into a table that is not yet visible to readers. The value must be absent.
    fn insert_unpublished(&self, hash: u64, value: V) {
        let mask = self.len() - 1;
        let mut bucket = bucket_index(hash, self.len());
        loop {
            if let Slot::Empty = self.load(bucket) {
                self.store(bucket, Slot::Occupied { hash, value });
                return;
            }
            bucket = (bucket + 1) & mask;
        }
    }
}

// Largest table `try_new` will allocate on the current thread; lets tests fail a rehash.
#[cfg(test)]
thread_local! {
    static TABLE_CAPACITY_LIMIT: std::cell::Cell<usize> = const { std::cell::Cell::new(usize::MAX) };
}

#[cfg(test)]
pub(crate) fn limit_table_capacity(limit: usize) {
    TABLE_CAPACITY_LIMIT.with(|cell| cell.set(limit));
}

impl<V> Drop for SlotTable<V> {
    fn drop(&mut self) {
        // SAFETY: `slots` came from `Box::leak` and is dropped exactly once.
        unsafe { drop(Box::from_raw(self.slots.as_ptr())) }
    }
}

#[inline(always)]
unsafe fn load_locked<V: Copy>(slots: *const UnsafeCell<Slot<V>>, bucket: usize) -> Slot<V> {
    ptr::read(UnsafeCell::raw_get(slots.add(bucket)))
}

/// Copy a slot without holding the lock. The result may be torn and must not be inspected
/// before the stamp it was read under validates.
#[inline(always)]
unsafe fn load_racy<V: Copy>(
    slots: *const UnsafeCell<Slot<V>>,
    bucket: usize,
) -> MaybeUninit<Slot<V>> {
    ptr::read_volatile(UnsafeCell::raw_get(slots.add(bucket)) as *const MaybeUninit<Slot<V>>)
}

// ================================================================================================
// SECTION
// ================================================================================================

/// Writer-only state, guarded by the section lock.
struct Tables<V> {
    current: SlotTable<V>,
    retired: Vec<SlotTable<V>>,
    /// Live plus tombstoned buckets.
    used_buckets: usize,
    resize_threshold: usize,
}

pub(crate) struct Section<V> {
    lock: StampedLock<Tables<V>>,
    /// Mirror of `Tables::current` for lock-free readers.
    values: AtomicPtr<UnsafeCell<Slot<V>>>,
    /// Published after `values` on rehash.
    capacity: AtomicUsize,
    size: AtomicUsize,
}

impl<V: Copy + Eq> Section<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        let current = SlotTable::new(capacity);
        let values = AtomicPtr::new(current.as_ptr());
        Self {
            lock: StampedLock::new(Tables {
                current,
                retired: Vec::new(),
                used_buckets: 0,
                resize_threshold: resize_threshold(capacity),
            }),
            values,
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub(crate) fn contains(&self, value: &V, hash: u64) -> bool {
        let stamp = self.lock.try_optimistic_read();
        let capacity = self.capacity.load(Ordering::Acquire);
        let slots = self.values.load(Ordering::Acquire);
        let mask = capacity - 1;
        let mut bucket = bucket_index(hash, capacity);

        if stamp != INVALID_STAMP {
            // At least one bucket is always empty, so a consistent probe ends within `capacity`.
            for _ in 0..capacity {
                // SAFETY: `slots` holds at least `capacity` slots and is never freed while the
                // section is alive.
                let raw = unsafe { load_racy(slots, bucket) };
                if !self.lock.validate(stamp) {
                    break;
                }
                // SAFETY: the stamp validated, so the copy was not torn by a writer.
                let slot = unsafe { raw.assume_init() };
                if slot.holds(value, hash) {
                    return true;
                }
                if let Slot::Empty = slot {
                    return false;
                }
                bucket = (bucket + 1) & mask;
            }
        }

        let guard = self.lock.read();
        let table = &guard.current;
        if table.len() != capacity {
            // Rehashed since the optimistic phase began; the old bucket means nothing here.
            bucket = bucket_index(hash, table.len());
        }
        let mask = table.len() - 1;
        loop {
            let slot = table.load(bucket);
            if slot.holds(value, hash) {
                return true;
            }
            if let Slot::Empty = slot {
                return false;
            }
            bucket = (bucket + 1) & mask;
        }
    }

    /// Insert `value`; returns `Ok(false)` if it was already present.
    ///
    /// When the insert pushes the section over its resize threshold the doubled slot array is
    /// allocated first, so an allocation failure leaves the section untouched.
    pub(crate) fn add(&self, value: V, hash: u64) -> Result<bool> {
        let mut tables = self.lock.write();
        let capacity = tables.current.len();
        let mask = capacity - 1;
        let mut bucket = bucket_index(hash, capacity);
        let mut first_deleted = None;

        loop {
            match tables.current.load(bucket) {
                Slot::Empty => break,
                Slot::Tombstone => {
                    if first_deleted.is_none() {
                        first_deleted = Some(bucket);
                    }
                }
                slot => {
                    if slot.holds(&value, hash) {
                        return Ok(false);
                    }
                }
            }
            bucket = (bucket + 1) & mask;
        }

        // Reusing a tombstone keeps `used_buckets` from growing.
        let (target, fresh) = match first_deleted {
            Some(deleted) => (deleted, false),
            None => (bucket, true),
        };

        let grown = if fresh && tables.used_buckets + 1 > tables.resize_threshold {
            let new_capacity = capacity
                .checked_mul(2)
                .ok_or(HashSetError::CapacityOverflow { capacity })?;
            match SlotTable::try_new(new_capacity) {
                Ok(table) => Some(table),
                Err(err) => {
                    tracing::warn!(capacity, new_capacity, "section rehash allocation failed");
                    return Err(err);
                }
            }
        } else {
            None
        };

        tables.current.store(target, Slot::Occupied { hash, value });
        self.size.fetch_add(1, Ordering::Relaxed);
        if fresh {
            tables.used_buckets += 1;
        }

        if let Some(new_table) = grown {
            self.rehash(&mut tables, new_table);
        }
        Ok(true)
    }

    pub(crate) fn remove(&self, value: &V, hash: u64) -> bool {
        let mut tables = self.lock.write();
        let capacity = tables.current.len();
        let mask = capacity - 1;
        let mut bucket = bucket_index(hash, capacity);

        loop {
            let slot = tables.current.load(bucket);
            if slot.holds(value, hash) {
                self.size.fetch_sub(1, Ordering::Relaxed);
                let next = (bucket + 1) & mask;
                if let Slot::Empty = tables.current.load(next) {
                    // End of the chain: nothing needs this bucket as a waypoint.
                    tables.current.store(bucket, Slot::Empty);
                    tables.used_buckets -= 1;
                } else {
                    tables.current.store(bucket, Slot::Tombstone);
                }
                return true;
            }
            if let Slot::Empty = slot {
                return false;
            }
            bucket = (bucket + 1) & mask;
        }
    }

    pub(crate) fn clear(&self) {
        let mut tables = self.lock.write();
        tables.current.fill_empty();
        tables.used_buckets = 0;
        self.size.store(0, Ordering::Relaxed);
    }

    /// Copy the live values of this section into `out`.
    ///
    /// Each bucket is validated right after it is read; on the first failure the partial
    /// optimistic result is dropped and the whole section is rescanned under the shared lock, so
    /// `out` receives one consistent view of the section with every value exactly once.
    pub(crate) fn snapshot_into(&self, out: &mut Vec<V>) {
        let start = out.len();
        let stamp = self.lock.try_optimistic_read();
        let capacity = self.capacity.load(Ordering::Acquire);
        let slots = self.values.load(Ordering::Acquire);

        if stamp != INVALID_STAMP {
            let mut consistent = true;
            for bucket in 0..capacity {
                // SAFETY: see `contains`.
                let raw = unsafe { load_racy(slots, bucket) };
                if !self.lock.validate(stamp) {
                    consistent = false;
                    break;
                }
                // SAFETY: validated above.
                if let Slot::Occupied { value, .. } = unsafe { raw.assume_init() } {
                    out.push(value);
                }
            }
            if consistent {
                return;
            }
            out.truncate(start);
        }

        let guard = self.lock.read();
        let table = &guard.current;
        out.extend((0..table.len()).filter_map(|bucket| match table.load(bucket) {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }));
    }

    /// Double the capacity, dropping tombstones. Runs under the exclusive lock.
    fn rehash(&self, tables: &mut Tables<V>, new_table: SlotTable<V>) {
        let old_capacity = tables.current.len();
        let new_capacity = new_table.len();

        for bucket in 0..old_capacity {
            if let Slot::Occupied { hash, value } = tables.current.load(bucket) {
                new_table.insert_unpublished(hash, value);
            }
        }

        let old_table = mem::replace(&mut tables.current, new_table);
        self.values.store(tables.current.as_ptr(), Ordering::Release);
        tables.used_buckets = self.size.load(Ordering::Relaxed);
        tables.resize_threshold = resize_threshold(new_capacity);
        // Capacity goes last: a reader that sees it must also see the larger array.
        self.capacity.store(new_capacity, Ordering::Release);
        tables.retired.push(old_table);

        tracing::trace!(
            old_capacity,
            new_capacity,
            size = tables.used_buckets,
            "section rehashed"
        );
    }

    #[cfg(test)]
    pub(crate) fn used_buckets(&self) -> usize {
        self.lock.read().used_buckets
    }

    #[cfg(test)]
    pub(crate) fn resize_threshold(&self) -> usize {
        self.lock.read().resize_threshold
    }

    #[cfg(test)]
    fn slot(&self, bucket: usize) -> Slot<V> {
        self.lock.read().current.load(bucket)
    }
}
