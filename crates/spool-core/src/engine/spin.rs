//! Test-and-set spin lock with a bounded acquire path
//!
//! Control threads use [`SpinLock::lock`], which spins (then yields) until
//! the flag is free. Audio-rate callers use [`SpinLock::try_lock_for`],
//! which gives up after a fixed number of attempts so it can never block
//! unboundedly.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::utils::Backoff;

/// Mutual exclusion over a single atomic flag
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `locked`
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire the lock, spinning until it is free
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while !self.try_acquire() {
            backoff.snooze();
        }
        SpinLockGuard { lock: self }
    }

    /// Single acquire attempt
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked.load(Ordering::Relaxed) {
            return None;
        }
        self.try_acquire().then(|| SpinLockGuard { lock: self })
    }

    /// Try at most `attempts` times, spinning briefly between attempts
    pub fn try_lock_for(&self, attempts: u32) -> Option<SpinLockGuard<'_, T>> {
        let backoff = Backoff::new();
        for _ in 0..attempts.max(1) {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            backoff.spin();
        }
        None
    }

    /// Whether the lock is currently held
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Access the value through a unique reference (no locking needed)
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// RAII guard; the lock is released on drop
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive access
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves exclusive access
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
