// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A two-state (locked, contended) mutex built on a [`Rutex`].
//!
//! Grounded on `original_source/libgo/routine_sync/mutex.h`'s `Mutex`: the
//! `MutexInternal { locked, contended }` byte pair becomes two bit flags in
//! the rutex's single `i32` word (spec.md §3's packing is a C struct-layout
//! artifact; the bits are what actually matter and survive the port
//! unchanged). `RawMutex` is that bare primitive; [`Mutex<T>`] wraps it with
//! an owned `T` and a guard, in the style of the teacher's
//! `KMutex<T>`/`KMutexGuard` (`kernel/src/sync/lock/mutex.rs`) — data
//! behind `UnsafeCell`, `Deref`/`DerefMut` on the guard, unlock on drop.

use crate::error::RutexWaitResult;
use crate::rutex::Rutex;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

const LOCKED: i32 = 1;
// Holds the `LOCKED` bit alongside the contended bit: the word must never
// read as unlocked while a holder is still inside its critical section, so
// the contended state has to be the locked state plus a bit, not a bare bit
// on its own (`swap`ing to a bare `2` would clear `LOCKED` out of the word
// entirely the instant any waiter contends the lock).
const CONTENDED: i32 = LOCKED | 2;

/// The bare lock/unlock primitive `ConditionVariable` is specified against
/// (spec.md §4.7 calls it "the associated mutex"). No payload; see
/// [`Mutex<T>`] for the data-carrying wrapper most callers want.
pub(crate) struct RawMutex {
    rutex: Rutex,
}

impl RawMutex {
    pub(crate) fn new() -> Self {
        Self { rutex: Rutex::new() }
    }

    pub(crate) fn rutex(&self) -> &Rutex {
        &self.rutex
    }

    /// Sets the locked bit unconditionally, preserving whatever the
    /// contended bit currently reads as — the same thing the original's
    /// sub-byte `locked.exchange(1)` does to `MutexInternal`, expressed
    /// here as a bit `fetch_or` on the combined word.
    pub(crate) fn try_lock(&self) -> bool {
        let prev = self.rutex.value().fetch_or(LOCKED, Ordering::Acquire);
        prev & LOCKED == 0
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.rutex.value().load(Ordering::Relaxed) & LOCKED != 0
    }

    pub(crate) fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.lock_contended(None);
    }

    /// Returns `false` only when `deadline` is `Some` and it passed first.
    pub(crate) fn lock_deadline(&self, deadline: Instant) -> bool {
        if self.try_lock() {
            return true;
        }
        matches!(self.lock_contended(Some(deadline)), RutexWaitResult::Success)
    }

    /// The slow path: mark the word contended and wait for it to clear,
    /// per spec.md §4.6. Only `Timeout` ever propagates out — every other
    /// rutex outcome means "the word may have changed, check again".
    pub(crate) fn lock_contended(&self, deadline: Option<Instant>) -> RutexWaitResult {
        while self.rutex.value().swap(CONTENDED, Ordering::Acquire) & LOCKED != 0 {
            let res = self.rutex.wait_until(CONTENDED, deadline);
            if matches!(res, RutexWaitResult::Timeout) {
                return res;
            }
        }
        RutexWaitResult::Success
    }

    /// Marks the word contended without otherwise disturbing it. Every
    /// ordinary path into this mutex's waiter queue goes through
    /// `lock_contended`, which always sets `CONTENDED` itself before
    /// parking — but `ConditionVariable::fast_notify_all` requeues waiters
    /// directly onto this rutex from outside that path, so it calls this
    /// to uphold the same invariant `unlock` relies on (queue non-empty
    /// implies the word reads `CONTENDED`); otherwise a holder whose own
    /// lock was uncontended would `unlock` without ever waking the
    /// waiters just requeued onto it.
    pub(crate) fn mark_contended(&self) {
        self.rutex.value().fetch_or(CONTENDED, Ordering::Release);
    }

    /// Unlocks, waking one contended waiter if any may exist. The
    /// contended bit is set conservatively by `lock_contended` (it may be
    /// set with no waiter actually queued yet), so this can cost at most
    /// one spurious `notify_one` — never a lost wake, per spec.md §4.6's
    /// invariant.
    pub(crate) fn unlock(&self) {
        let prev = self.rutex.value().swap(0, Ordering::Release);
        if prev == LOCKED {
            return;
        }
        self.rutex.notify_one();
    }
}

unsafe impl Send for RawMutex {}
unsafe impl Sync for RawMutex {}

/// A mutex guarding a `T`, built on [`RawMutex`].
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Blocks until locked or `deadline` passes, whichever comes first.
    pub fn lock_deadline(&self, deadline: Instant) -> Option<MutexGuard<'_, T>> {
        if self.raw.lock_deadline(deadline) {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    pub fn lock_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        self.lock_deadline(Instant::now() + timeout)
    }

    pub(crate) fn raw(&self) -> &RawMutex {
        &self.raw
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn raw_mutex(&self) -> &'a RawMutex {
        &self.mutex.raw
    }

    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }

    /// Rebuilds a guard around a mutex whose raw lock is already held by the
    /// caller. Used by `ConditionVariable::wait*` to hand back a guard after
    /// releasing and reacquiring the raw lock around the actual wait.
    pub(crate) fn from_raw(mutex: &'a Mutex<T>) -> Self {
        Self { mutex }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::thread;
    use std::sync::Arc;

    #[test]
    fn try_lock_then_try_lock_fails() {
        let m = Mutex::new(0);
        let g = m.try_lock().unwrap();
        assert!(m.try_lock().is_none());
        drop(g);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn unlock_wakes_a_contended_waiter() {
        let m = Arc::new(Mutex::new(0));
        let g = m.lock();
        let m2 = m.clone();
        let h = thread::spawn(move || {
            let mut g = m2.lock();
            *g += 1;
        });
        thread::sleep(Duration::from_millis(30));
        drop(g);
        h.join().unwrap();
        assert_eq!(*m.lock(), 1);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        // Scenario S1 (spec.md §8): many threads incrementing a shared
        // counter must never race past each other.
        let m = Arc::new(Mutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = m.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let mut g = m.lock();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 1600);
    }

    #[test]
    fn lock_timeout_on_held_mutex_returns_none() {
        let m = Mutex::new(());
        let _g = m.lock();
        assert!(m.lock_timeout(Duration::from_millis(30)).is_none());
    }

    #[test]
    fn lock_timeout_succeeds_once_released() {
        let m = Arc::new(Mutex::new(0));
        let g = m.lock();
        let m2 = m.clone();
        let h = thread::spawn(move || m2.lock_timeout(Duration::from_millis(500)).is_some());
        thread::sleep(Duration::from_millis(20));
        drop(g);
        assert!(h.join().unwrap());
    }
}
