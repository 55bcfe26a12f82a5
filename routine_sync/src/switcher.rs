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

//! The suspend/resume capability that lets a rutex park either an OS thread
//! or a coroutine without knowing which.
//!
//! Grounded directly on `original_source/libgo/routine_sync/switcher.h`:
//! `RoutineSwitcherI` becomes the [`Switcher`] trait, `PThreadSwitcher`
//! becomes [`ThreadSwitcher`], and `RoutineSyncPolicy` becomes the
//! [`current`] resolver. Per spec.md §9's redesign note, the original's
//! `clsRef<S1, S2, ...>()` template recursion (one virtual dispatch per
//! wait) is replaced with a registry resolved once at
//! [`register_switchers!`] time: a flat list of `(is_in_routine, current)`
//! function-pointer pairs, walked in order. Only the first match per wait
//! costs a handful of non-virtual calls; nothing here pays for dynamic
//! dispatch across translation units the way the template recursion would.

use crate::compat::{thread, Condvar, Mutex};
use std::sync::OnceLock;

/// The suspend/resume capability for one blocked call.
///
/// A `Switcher` instance is obtained once per wait (via [`current`]) and
/// used for exactly one sleep/wake pair; it is never reused across waits.
pub trait Switcher: Send + Sync {
    /// Blocks the calling execution context until [`Switcher::wake`] is
    /// called (or, for [`ThreadSwitcher`], spuriously — callers must loop on
    /// their own predicate, as every caller in this crate does).
    fn sleep(&self);

    /// Unblocks whatever is sleeping on this switcher.
    ///
    /// Must be idempotent: of any number of concurrent `wake` calls paired
    /// with a single `sleep`, at most one may report success (`true`); the
    /// rest report `false` and have no further effect.
    fn wake(&self) -> bool;
}

/// A [`Switcher`] kind that can answer "is the current execution context one
/// of mine?" and hand back its thread- or coroutine-local instance.
///
/// Implemented by every switcher kind registered with
/// [`register_switchers!`]; a host scheduler's coroutine switcher must
/// implement this the same way [`ThreadSwitcher`] does.
pub trait RoutineSwitcher: Switcher + 'static {
    /// True if the calling context is this switcher kind's.
    fn is_in_routine() -> bool
    where
        Self: Sized;

    /// The context-local switcher instance for the calling context.
    ///
    /// Only ever called when [`RoutineSwitcher::is_in_routine`] just
    /// returned `true` for the same context.
    fn current() -> &'static dyn Switcher
    where
        Self: Sized;
}

/// The OS-thread blocking backend: a mutex/condvar pair, one per thread.
///
/// Matches `PThreadSwitcher` in the original one for one. Always available
/// (gated behind the `thread` feature, which is on by default) as the
/// fallback every [`current`] resolution lands on if no coroutine switcher
/// claims the current context.
pub struct ThreadSwitcher {
    waiting: Mutex<bool>,
    cond: Condvar,
}

impl ThreadSwitcher {
    fn new() -> Self {
        Self {
            waiting: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

impl Switcher for ThreadSwitcher {
    fn sleep(&self) {
        let mut waiting = self.waiting.lock().unwrap();
        *waiting = true;
        while *waiting {
            waiting = self.cond.wait(waiting).unwrap();
        }
    }

    fn wake(&self) -> bool {
        let mut waiting = self.waiting.lock().unwrap();
        if !*waiting {
            return false;
        }
        *waiting = false;
        self.cond.notify_one();
        true
    }
}

impl RoutineSwitcher for ThreadSwitcher {
    // An OS thread is always "in" the thread switcher's routine kind; it is
    // the fallback every other kind is checked against first.
    fn is_in_routine() -> bool {
        true
    }

    fn current() -> &'static dyn Switcher {
        thread_local! {
            static CURRENT: ThreadSwitcher = ThreadSwitcher::new();
        }
        // SAFETY: the thread-local lives for the duration of the thread, and
        // every caller of `current()` uses the reference only within that
        // same thread's call stack (it is handed straight to a
        // stack-allocated `RutexWaiter` and never escapes past the wait
        // call) — the same lifetime assumption the original makes with
        // `static thread_local PThreadSwitcher pts; return &pts;`.
        CURRENT.with(|s| unsafe { &*(s as *const ThreadSwitcher) })
    }
}

type IsInRoutineFn = fn() -> bool;
type CurrentFn = fn() -> &'static dyn Switcher;

static POLICY: OnceLock<Mutex<Vec<(IsInRoutineFn, CurrentFn)>>> = OnceLock::new();

/// Registers the ordered list of non-thread switcher kinds a host scheduler
/// supports. Called once at process startup; later calls replace the list
/// (mirrors `RoutineSyncPolicy::registerSwitchers<...>`, which the original
/// also allows to be called again to reassign the resolver function).
///
/// Prefer the [`register_switchers!`] macro over calling this directly — it
/// builds the function-pointer list from a type list the way the original's
/// template parameter pack does.
#[doc(hidden)]
pub fn register_switchers_impl(entries: &[(IsInRoutineFn, CurrentFn)]) {
    let cell = POLICY.get_or_init(|| Mutex::new(Vec::new()));
    *cell.lock().unwrap() = entries.to_vec();
}

/// Declares, in preference order, the [`RoutineSwitcher`] kinds a host
/// scheduler supports besides the built-in [`ThreadSwitcher`] fallback.
///
/// ```ignore
/// routine_sync::register_switchers!(MyCoroutineSwitcher);
/// ```
#[macro_export]
macro_rules! register_switchers {
    ($($s:ty),+ $(,)?) => {
        $crate::switcher::register_switchers_impl(&[
            $((
                <$s as $crate::switcher::RoutineSwitcher>::is_in_routine,
                <$s as $crate::switcher::RoutineSwitcher>::current,
            )),+
        ]);
    };
}

/// Resolves the switcher for the calling execution context: the first
/// registered kind whose `is_in_routine()` returns true, falling back to
/// [`ThreadSwitcher`] if none match (or none were ever registered).
pub(crate) fn current() -> &'static dyn Switcher {
    if let Some(cell) = POLICY.get() {
        let entries = cell.lock().unwrap();
        for (is_in_routine, current) in entries.iter() {
            if is_in_routine() {
                return current();
            }
        }
    }
    ThreadSwitcher::current()
}

/// True if the calling context is not the OS-thread fallback — i.e. some
/// registered coroutine switcher claims it. Exposed for callers (e.g.
/// channel rendezvous bookkeeping) that want to log or branch on which
/// backend is active without paying for a second full resolution.
pub fn is_in_routine() -> bool {
    if let Some(cell) = POLICY.get() {
        let entries = cell.lock().unwrap();
        return entries.iter().any(|(is_in_routine, _)| is_in_routine());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_switcher_wake_before_sleep_is_idempotent() {
        let sw = ThreadSwitcher::new();
        // No one is sleeping yet: wake is a documented no-op.
        assert!(!sw.wake());
    }

    #[test]
    fn thread_switcher_sleep_wake_round_trip() {
        let sw = std::sync::Arc::new(ThreadSwitcher::new());
        let sw2 = sw.clone();
        let woke = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let woke2 = woke.clone();
        let handle = thread::spawn(move || {
            sw2.sleep();
            woke2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        // Give the thread a moment to reach `sleep()`; wake() is safe to
        // retry since it is specified idempotent and the thread switcher's
        // own mutex serializes against a concurrent `sleep()` setting
        // `waiting` to true.
        loop {
            if sw.wake() {
                break;
            }
            thread::yield_now();
        }
        handle.join().unwrap();
        assert!(woke.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn current_falls_back_to_thread_switcher() {
        // No registration has happened (or a prior test's registration is a
        // no-op fallback too): current() must still resolve to something
        // usable.
        let sw = current();
        assert!(!sw.wake());
    }
}
