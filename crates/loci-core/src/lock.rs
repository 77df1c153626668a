// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Locality-local mutual exclusion.
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Mutex guarding state shared by one locality's concurrent workers.
///
/// Every backend runs locality work on OS threads, so a std mutex is the
/// right primitive for all of them. A poisoned lock is recovered: the
/// panicking worker already reported its failure through its handle.
#[derive(Debug, Default)]
pub struct Lock<T> {
    inner: Mutex<T>,
}

impl<T> Lock<T> {
    /// Wraps `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, blocking the current worker.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Acquires the lock if no one holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Runs `f` with exclusive access to the value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Consumes the lock and returns the value.
    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = Arc::new(Lock::new(0_u64));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let counter = &counter;
                s.spawn(move || {
                    for _ in 0..1000 {
                        counter.with(|c| *c += 1);
                    }
                });
            }
        });
        assert_eq!(*counter.lock(), 8000);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let lock = Arc::new(Lock::new(vec![1]));
        let cloned = Arc::clone(&lock);
        let result = std::thread::spawn(move || {
            let _guard = cloned.lock();
            std::panic::panic_any("worker failed");
        })
        .join();
        assert!(result.is_err());
        lock.with(|v| v.push(2));
        assert_eq!(*lock.lock(), vec![1, 2]);
    }

    #[test]
    fn try_lock_backs_off_while_held() {
        let lock = Lock::new(0_u8);
        let held = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(held);
        assert!(lock.try_lock().is_some());
    }
}
