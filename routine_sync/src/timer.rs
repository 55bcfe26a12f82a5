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

//! A single process-wide timer service used for timed rutex waits.
//!
//! Grounded on `original_source/libgo/routine_sync/timer.h`'s
//! `RoutineSyncTimer`: same `schedule`/`reschedule`/`join_unschedule` shape,
//! same per-entry mutex serializing invoke vs cancel vs reschedule, same
//! skiplist-backed ordered set keyed by deadline. Per spec.md §9's redesign
//! note the run loop here sleeps on a condvar until the nearest deadline (or
//! a defensive backstop) instead of the original's busy `for(;;) { ... ;
//! continue; } sleep_for(20ms)` loop, which never actually reaches its own
//! sleep — `continue` re-enters the `for` before the `sleep_for` below it is
//! ever executed. That bug is not reproduced.

use crate::compat::{thread, Condvar, Mutex};
use crate::skiplist::{self, SkipList};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Upper bound on how long the background thread ever sleeps between
/// checking the nearest deadline — insurance against a missed wakeup
/// notification, not load-bearing for correctness.
const MAX_BACKSTOP: Duration = Duration::from_millis(20);

type TimerFn = Box<dyn FnOnce() + Send>;

struct EntryState {
    func: Option<TimerFn>,
    done: bool,
}

/// The callback wrapper linked into the timer's skiplist. Matches the
/// original's `FuncWrapper`: a mutex serializing invoke/cancel/reschedule, an
/// atomic canceled flag checked after that mutex is held, and a `done` flag
/// read back by `join_unschedule`.
struct TimerEntry {
    state: Mutex<EntryState>,
    canceled: AtomicBool,
}

impl TimerEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(EntryState {
                func: None,
                done: false,
            }),
            canceled: AtomicBool::new(false),
        }
    }

    /// Installs a fresh callback and clears `done`/`canceled`. Called only
    /// by `Timer::schedule`, before the entry is linked into the skiplist.
    fn set(&self, f: TimerFn) {
        let mut state = self.state.lock().unwrap();
        state.func = Some(f);
        state.done = false;
        self.canceled.store(false, Ordering::Release);
    }

    /// Re-arms a previously scheduled entry for `reschedule`, keeping the
    /// same callback.
    fn rearm(&self, state: &mut EntryState) {
        state.done = false;
        self.canceled.store(false, Ordering::Release);
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Runs the callback if it has not been canceled. Caller must be
    /// holding `state` (the entry's own mutex) — that lock is what
    /// serializes this against a concurrent `cancel`/`reschedule`/
    /// `join_unschedule`.
    fn invoke(&self, state: &mut EntryState) {
        if self.canceled.load(Ordering::Acquire) {
            return;
        }
        if let Some(f) = state.func.take() {
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                log::warn!("routine_sync: timer callback panicked, continuing");
            }
        }
        state.done = true;
    }
}

/// A caller-owned handle identifying one scheduled timer entry.
///
/// Like [`crate::rutex::RutexWaiter`], this is meant to be stack- or
/// struct-embedded by its owner, not boxed by the timer: [`Timer::schedule`]
/// links it into the timer's skiplist by address, and the owner must call
/// [`Timer::join_unschedule`] before it drops or moves the `TimerId`.
pub struct TimerId {
    node: skiplist::Node<Instant, TimerEntry>,
}

impl TimerId {
    pub fn new() -> Self {
        Self {
            node: skiplist::Node::new(Instant::now(), TimerEntry::new()),
        }
    }
}

impl Default for TimerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide timer service. Obtain the singleton with
/// [`Timer::global`]; there is no explicit shutdown, matching spec.md §5's
/// "the timer is process-global" — the background thread runs for the
/// life of the process.
pub struct Timer {
    list: Mutex<SkipList<Instant, TimerEntry>>,
    cond: Condvar,
}

static TIMER: OnceLock<Timer> = OnceLock::new();
static TIMER_THREAD_STARTED: OnceLock<()> = OnceLock::new();

impl Timer {
    pub fn global() -> &'static Timer {
        let timer = TIMER.get_or_init(|| Timer {
            list: Mutex::new(SkipList::new()),
            cond: Condvar::new(),
        });
        TIMER_THREAD_STARTED.get_or_init(|| {
            thread::Builder::new()
                .name("routine_sync_timer".to_string())
                .spawn(Self::run_global)
                .expect("failed to start routine_sync timer thread");
        });
        timer
    }

    fn run_global() {
        Timer::global().run();
    }

    /// A monotonic clock reading, used as the deadline currency throughout
    /// this crate (`std::time::Instant` is Rust's one monotonic clock type,
    /// so unlike the original there is no cross-clock `convert` step — see
    /// SPEC_FULL.md §10).
    pub fn now() -> Instant {
        Instant::now()
    }

    /// Links `id` into the timer, due at `deadline`. `id` must not already
    /// be scheduled (callers enforce this; a `RutexWaiter` schedules at most
    /// once per wait).
    pub fn schedule(&self, id: &mut TimerId, deadline: Instant, f: impl FnOnce() + Send + 'static) {
        id.node.key = deadline;
        id.node.value.set(Box::new(f));
        // Random height can be rolled before taking the list's lock, same as
        // the original's `buildNode` being called outside `mtx_`.
        SkipList::<Instant, TimerEntry>::prepare_height(&mut id.node);

        let ptr = NonNull::from(&mut id.node);
        {
            let mut list = self.list.lock().unwrap();
            unsafe { list.insert(ptr) };
        }
        // A new entry may now be the nearest deadline; nudge the run loop
        // so it doesn't oversleep against its previous wait target.
        self.cond.notify_one();
    }

    /// Moves `id`'s deadline to `new_deadline`, keeping its callback.
    ///
    /// Blocks on the entry's own mutex first, so a reschedule that races
    /// with the run loop's invoke either happens strictly before or
    /// strictly after it. Per spec.md §4.4: calling this *from inside* the
    /// callback `id` is currently running would deadlock on that same
    /// mutex — this is a documented hazard, not guarded against, matching
    /// the original.
    pub fn reschedule(&self, id: &mut TimerId, new_deadline: Instant) {
        let entry_ptr: *const TimerEntry = &id.node.value;
        let mut state = unsafe { &*entry_ptr }.state.lock().unwrap();
        unsafe { &*entry_ptr }.cancel();

        {
            let mut list = self.list.lock().unwrap();
            unsafe { list.erase(NonNull::from(&mut id.node), false) };
        }

        unsafe { &*entry_ptr }.rearm(&mut state);
        id.node.key = new_deadline;
        drop(state);

        let ptr = NonNull::from(&mut id.node);
        {
            let mut list = self.list.lock().unwrap();
            unsafe { list.insert(ptr) };
        }
        self.cond.notify_one();
    }

    /// Cancels `id` and blocks until any in-flight invocation of it has
    /// finished. Returns whether the callback had already run to completion
    /// before cancellation took effect. After this returns, `id`'s callback
    /// is guaranteed never to run again.
    pub fn join_unschedule(&self, id: &mut TimerId) -> bool {
        let entry_ptr: *const TimerEntry = &id.node.value;
        let state = unsafe { &*entry_ptr }.state.lock().unwrap();
        unsafe { &*entry_ptr }.cancel();

        {
            let mut list = self.list.lock().unwrap();
            unsafe { list.erase(NonNull::from(&mut id.node), true) };
        }

        state.done
    }

    fn run(&self) {
        let mut list = self.list.lock().unwrap();
        loop {
            let now = Instant::now();
            loop {
                let Some(front) = list.front() else { break };
                let deadline = unsafe { front.as_ref().key };
                if deadline > now {
                    break;
                }

                let entry_ptr: *const TimerEntry = unsafe { &front.as_ref().value };
                let try_lock = unsafe { &*entry_ptr }.state.try_lock();
                unsafe { list.erase(front, true) };

                match try_lock {
                    Ok(mut state) => {
                        // Drop the list lock while running user code: the
                        // callback may itself call back into `schedule` for
                        // a different id.
                        drop(list);
                        unsafe { &*entry_ptr }.invoke(&mut state);
                        drop(state);
                        list = self.list.lock().unwrap();
                    }
                    Err(_) => {
                        // A `reschedule`/`join_unschedule` in progress on
                        // this exact entry owns it now; nothing to do here.
                    }
                }
            }

            let wait_for = match list.front() {
                Some(front) => {
                    let deadline = unsafe { front.as_ref().key };
                    deadline.saturating_duration_since(Instant::now()).min(MAX_BACKSTOP)
                }
                None => MAX_BACKSTOP,
            };
            let (guard, _timed_out) = self.cond.wait_timeout(list, wait_for).unwrap();
            list = guard;
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty_for_test(&self) -> bool {
        self.list.lock().unwrap().is_empty()
    }
}

// SAFETY: `TimerEntry`'s only non-Sync-by-default content is the boxed
// callback inside `Mutex<EntryState>`, which is itself `Send` (the bound on
// `Timer::schedule`'s `f`); `Mutex<T: Send>` is already `Sync`. The
// surrounding `skiplist::Node` holds raw pointers with no thread affinity.
unsafe impl Send for TimerEntry {}
unsafe impl Sync for TimerEntry {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn fires_after_deadline() {
        let timer = Timer::global();
        let mut id = TimerId::new();
        let (tx, rx) = mpsc::channel();
        timer.schedule(&mut id, Instant::now() + Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_millis(500)).expect("timer did not fire");
        timer.join_unschedule(&mut id);
    }

    #[test]
    fn cancel_before_fire_never_invokes() {
        let timer = Timer::global();
        let mut id = TimerId::new();
        let fired = std::sync::Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        timer.schedule(&mut id, Instant::now() + Duration::from_millis(200), move || {
            fired2.store(true, Ordering::SeqCst);
        });
        let done = timer.join_unschedule(&mut id);
        assert!(!done);
        thread::sleep(Duration::from_millis(300));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn reschedule_moves_deadline_without_duplicate_fire() {
        let timer = Timer::global();
        let mut id = TimerId::new();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let count2 = count.clone();
        timer.schedule(&mut id, Instant::now() + Duration::from_millis(20), move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        timer.reschedule(&mut id, Instant::now() + Duration::from_millis(60));
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        timer.join_unschedule(&mut id);
    }

    #[test]
    fn join_unschedule_after_fire_reports_done() {
        let timer = Timer::global();
        let mut id = TimerId::new();
        timer.schedule(&mut id, Instant::now() + Duration::from_millis(10), || {});
        thread::sleep(Duration::from_millis(100));
        let done = timer.join_unschedule(&mut id);
        assert!(done);
    }
}
