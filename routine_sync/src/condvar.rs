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

//! A condition variable built on a [`Rutex`], keyed on a generation counter
//! rather than a true wait queue.
//!
//! Grounded on `original_source/libgo/routine_sync/condition_variable.h`'s
//! `ConditionVariable`: `notify_*` bump the rutex's value (the "generation"
//! spec.md §3 describes) before notifying/requeuing, and `wait*` snapshot
//! that value, release the caller's mutex, block on the rutex seeing a
//! different value, then reacquire the mutex through its contended path —
//! never the fast path — "to preserve fairness of the requeue" per
//! spec.md §4.7.

use crate::error::RutexWaitResult;
use crate::mutex::{Mutex, MutexGuard};
use crate::rutex::Rutex;
use std::sync::atomic::Ordering;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicPtr, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// Mirrors `std::sync::Condvar`'s `WaitTimeoutResult`: tells a
/// `wait_deadline`/`wait_timeout` caller whether the deadline passed
/// without a notify ever landing.
#[derive(Debug, Clone, Copy)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

pub struct ConditionVariable {
    rutex: Rutex,
    /// Debug-only enforcement of spec.md §9's open question: every
    /// `wait`/`fast_notify_all` call on one `ConditionVariable` must use the
    /// same associated `Mutex`. The original documents this precondition
    /// but never checks it; we record the first mutex's address and panic
    /// on a later mismatch in debug builds only (a no-op in release, same
    /// cost profile the original has for this check: none).
    #[cfg(debug_assertions)]
    bound_mutex: AtomicPtr<()>,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            rutex: Rutex::new(),
            #[cfg(debug_assertions)]
            bound_mutex: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    #[cfg(debug_assertions)]
    fn check_mutex<T>(&self, guard: &MutexGuard<'_, T>) {
        let addr = guard.mutex() as *const Mutex<T> as *mut ();
        match self
            .bound_mutex
            .compare_exchange(std::ptr::null_mut(), addr, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
        {
            Ok(_) => {}
            Err(existing) => assert_eq!(
                existing, addr,
                "ConditionVariable used with more than one Mutex; every wait()/fast_notify_all() \
                 on a given ConditionVariable must share the same associated Mutex"
            ),
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_mutex<T>(&self, _guard: &MutexGuard<'_, T>) {}

    pub fn notify_one(&self) {
        self.rutex.value().fetch_add(1, Ordering::Release);
        self.rutex.notify_one();
    }

    pub fn notify_all(&self) {
        self.rutex.value().fetch_add(1, Ordering::Release);
        self.rutex.notify_all();
    }

    /// Requeues every waiter straight onto `guard`'s mutex's rutex instead
    /// of waking them, avoiding the thundering herd of N waiters all
    /// immediately re-blocking on the same mutex. Every waiter on this
    /// `ConditionVariable` must be waiting with the same mutex as `guard`
    /// (checked in debug builds; undefined behavior per spec if violated,
    /// same as the original).
    pub fn fast_notify_all<T>(&self, guard: &MutexGuard<'_, T>) {
        self.check_mutex(guard);
        self.rutex.value().fetch_add(1, Ordering::Release);
        self.rutex.requeue(guard.raw_mutex().rutex());
        // The requeued waiters bypassed `lock_contended`'s own
        // CONTENDED-setting step, so `guard`'s own eventual unlock must
        // still see the bit or it will skip waking the first of them.
        guard.raw_mutex().mark_contended();
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.wait_deadline_impl(guard, None).0
    }

    pub fn wait_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        while condition(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    pub fn wait_deadline<'a, T>(&self, guard: MutexGuard<'a, T>, deadline: Instant) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.wait_deadline_impl(guard, Some(deadline))
    }

    pub fn wait_timeout<'a, T>(&self, guard: MutexGuard<'a, T>, dur: Duration) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.wait_deadline(guard, Instant::now() + dur)
    }

    pub fn wait_deadline_while<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Instant,
        mut condition: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        while condition(&mut guard) {
            let (g, timed_out) = self.wait_deadline(guard, deadline);
            guard = g;
            if timed_out.timed_out() {
                let still = condition(&mut guard);
                return (guard, WaitTimeoutResult(still));
            }
        }
        (guard, WaitTimeoutResult(false))
    }

    pub fn wait_timeout_while<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
        condition: impl FnMut(&mut T) -> bool,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.wait_deadline_while(guard, Instant::now() + dur, condition)
    }

    fn wait_deadline_impl<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.check_mutex(&guard);
        let expected = self.rutex.value().load(Ordering::Relaxed);
        let mutex = guard.mutex();
        let raw = guard.raw_mutex();
        // We already captured everything we need from `guard`; forget it so
        // its `Drop` impl does not also unlock what we are about to unlock
        // ourselves.
        std::mem::forget(guard);
        raw.unlock();

        let res = self.rutex.wait_until(expected, deadline);
        let timed_out = matches!(res, RutexWaitResult::Timeout);

        // Reacquire via the contended path, skipping the fast `try_lock`,
        // so a `fast_notify_all` requeue's FIFO ordering survives the
        // reacquire (spec.md §4.7).
        raw.lock_contended(None);

        (MutexGuard::from_raw(mutex), WaitTimeoutResult(timed_out))
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for ConditionVariable {}
unsafe impl Sync for ConditionVariable {}
