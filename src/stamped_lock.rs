//! Version-stamped reader/writer lock (seqlock layered over a `parking_lot::RwLock`).
//!
//! Three access modes:
//! - optimistic: [`StampedLock::try_optimistic_read`] returns a stamp without blocking anyone,
//!   [`StampedLock::validate`] tells whether a writer ran since the stamp was taken;
//! - shared: [`StampedLock::read`], used by readers that lost an optimistic race;
//! - exclusive: [`StampedLock::write`], which also bumps the version so optimistic readers notice.
//!
//! The version is even while no writer holds the lock and odd while one does.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stamp value that never validates.
pub(crate) const INVALID_STAMP: u64 = 0;

pub(crate) struct StampedLock<T> {
    // Starts at 2 so that 0 stays reserved for INVALID_STAMP.
    version: AtomicU64,
    lock: RwLock<T>,
}

pub(crate) struct ReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

pub(crate) struct WriteGuard<'a, T> {
    version: &'a AtomicU64,
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> StampedLock<T> {
    pub(crate) fn new(data: T) -> Self {
        Self {
            version: AtomicU64::new(2),
            lock: RwLock::new(data),
        }
    }

    /// Stamp for an optimistic read, or [`INVALID_STAMP`] if a writer is active.
    #[inline(always)]
    pub(crate) fn try_optimistic_read(&self) -> u64 {
        let v = self.version.load(Ordering::Acquire);
        if v & 1 == 0 {
            v
        } else {
            INVALID_STAMP
        }
    }

    /// Whether no writer acquired the lock since `stamp` was issued.
    ///
    /// Everything read between the stamp and a successful validation is consistent.
    #[inline(always)]
    pub(crate) fn validate(&self, stamp: u64) -> bool {
        fence(Ordering::Acquire);
        stamp != INVALID_STAMP && self.version.load(Ordering::Relaxed) == stamp
    }

    /// Acquire the lock in shared mode.
    #[inline]
    pub(crate) fn read(&self) -> ReadGuard<'_, T> {
        ReadGuard {
            guard: self.lock.read(),
        }
    }

    /// Acquire the lock in exclusive mode.
    #[inline]
    pub(crate) fn write(&self) -> WriteGuard<'_, T> {
        let guard = self.lock.write();
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v + 1, Ordering::Relaxed);
        // Slot writes made under the guard must not become visible before the odd version.
        fence(Ordering::Release);
        WriteGuard {
            version: &self.version,
            guard,
        }
    }

    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        // Publish an even version before the RwLock itself is released (fields drop after this).
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v + 1, Ordering::Release);
    }
}
