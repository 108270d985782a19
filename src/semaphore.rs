// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Counting semaphore used to wake the pool's background threads.
//!
//! The dispatcher and garbage threads park on one of these while idle. The
//! count is an atomic, so posting never waits on a lock and can be used from
//! the audio thread.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Longest a waiter stays parked before re-checking the count.
const PARK_SLICE: Duration = Duration::from_millis(5);

/// Errors raised by semaphore operations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    #[error("Semaphore count would overflow")]
    Overflow,

    #[error("Initial semaphore count {0} exceeds the maximum")]
    InitialCountTooLarge(u64),
}

/// A counting semaphore.
///
/// Every fallible operation returns a `Result`; callers on background threads
/// propagate it with `?`, callers that must not fail inspect and log it.
pub struct RealtimeSemaphore {
    count: AtomicU32,
    waiters: AtomicU32,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl RealtimeSemaphore {
    /// Creates a semaphore with the given initial count.
    pub fn new(initial: u64) -> Result<Self, SemaphoreError> {
        let initial =
            u32::try_from(initial).map_err(|_| SemaphoreError::InitialCountTooLarge(initial))?;
        Ok(Self {
            count: AtomicU32::new(initial),
            waiters: AtomicU32::new(0),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        })
    }

    /// Increments the count and wakes one waiter. Never blocks.
    pub fn post(&self) -> Result<(), SemaphoreError> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_add(1))
            .map_err(|_| SemaphoreError::Overflow)?;

        if self.waiters.load(Ordering::SeqCst) > 0 {
            // A waiter holding the lock may be about to park; it re-checks
            // the count within one park slice.
            drop(self.lock.try_lock());
            self.condvar.notify_one();
        }
        Ok(())
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) {
        self.park(None);
    }

    /// Decrements the count if it is positive. Never blocks.
    pub fn try_wait(&self) -> bool {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok()
    }

    /// Waits up to `timeout` for the count to become positive. Returns whether
    /// the semaphore was acquired.
    pub fn timed_wait(&self, timeout: Duration) -> bool {
        self.park(Some(Instant::now() + timeout))
    }

    fn park(&self, deadline: Option<Instant>) -> bool {
        if self.try_wait() {
            return true;
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        let acquired = loop {
            if self.try_wait() {
                break true;
            }
            let now = Instant::now();
            let until = match deadline {
                Some(deadline) if deadline <= now => break false,
                Some(deadline) => deadline.min(now + PARK_SLICE),
                None => now + PARK_SLICE,
            };
            self.condvar.wait_until(&mut guard, until);
        };
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        acquired
    }

    /// Current count, for diagnostics.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RealtimeSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSemaphore")
            .field("count", &self.count())
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}
