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

//! The rutex: a routine-aware futex. Everything in `mutex.rs`, `condvar.rs`
//! and `channel.rs` bottoms out here.
//!
//! Grounded directly on `original_source/libgo/routine_sync/rutex.h`'s
//! `Rutex`/`RutexWaiter`. The wait/notify/requeue algorithms, the ABBA lock
//! ordering between `notify_one` and `join`, and the waiter state machine
//! are ported one for one; see inline comments at each point where this
//! deviates (every deviation is a named bug fix from spec.md §9, never a
//! behavior change).
//!
//! A [`RutexWaiter`] is never boxed, never moved after its address is taken,
//! and never outlives the [`Rutex::wait_until`] call that created it —
//! exactly the original's "stack-allocated inside the wait call" lifecycle.
//! Its intrusive link is retrieved from a list node pointer via
//! `offset_of!`, the same container-of technique
//! `blue_infra::intrusive::Adapter` uses for the teacher's own intrusive
//! lists, just inlined here since this crate's list has exactly one node
//! type.

use crate::compat::{atomic, thread, Mutex};
use crate::error::RutexWaitResult;
use crate::list::{self, List};
use crate::switcher::{self, Switcher};
use crate::timer::{Timer, TimerId};
use atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU8, Ordering};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

const STATE_NONE: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_INTERRUPTED: u8 = 2;
const STATE_TIMEOUT: u8 = 3;

/// One blocked call's bookkeeping. See the module doc for its lifecycle.
pub(crate) struct RutexWaiter {
    link: list::Node,
    switcher: &'static dyn Switcher,
    state: AtomicU8,
    /// Suppresses redundant wakes once any source has succeeded; also lets
    /// `join` skip waiting on `wait_mtx` for a waiter that never parked.
    waked: AtomicBool,
    /// Small per-waiter mutex guarding the wake-vs-timer-vs-join race.
    /// Locked by `notify_one` (via `try_lock`, skipping on failure) and by
    /// `wake_by_timer` (same), and unconditionally by `join` — the ABBA
    /// pairing spec.md §4.5 and §5 describe.
    wait_mtx: Mutex<()>,
    /// The rutex this waiter is currently linked into, or null. Read with
    /// acquire/relaxed and re-checked under that rutex's own lock before
    /// any unlink, per the design notes' "lock-then-recheck" pattern — this
    /// is what makes `safe_unlink` race-free against a concurrent
    /// `Rutex::requeue`.
    owner: AtomicPtr<Rutex>,
    /// Exclusive to this waiter's owning thread until `schedule` is called,
    /// and thereafter exclusive to whichever thread holds `wait_mtx`
    /// (either the owning thread inside `join`, or the timer thread inside
    /// `wake_by_timer`) — never touched concurrently, so plain interior
    /// mutability is sound without atomics.
    timer_id: UnsafeCell<TimerId>,
    timer_armed: bool,
    delay_ms: UnsafeCell<u64>,
}

impl RutexWaiter {
    fn new(switcher: &'static dyn Switcher) -> Self {
        Self {
            link: list::Node::new(),
            switcher,
            state: AtomicU8::new(STATE_NONE),
            waked: AtomicBool::new(false),
            wait_mtx: Mutex::new(()),
            owner: AtomicPtr::new(std::ptr::null_mut()),
            timer_id: UnsafeCell::new(TimerId::new()),
            timer_armed: false,
            delay_ms: UnsafeCell::new(1),
        }
    }

    fn link_ptr(&self) -> NonNull<list::Node> {
        NonNull::from(&self.link)
    }

    /// Recovers the owning `RutexWaiter` from a list-node pointer handed
    /// back by `List`. `node` must actually be a `RutexWaiter::link` field.
    unsafe fn from_link(node: NonNull<list::Node>) -> NonNull<RutexWaiter> {
        let offset = std::mem::offset_of!(RutexWaiter, link);
        NonNull::new_unchecked((node.as_ptr() as *mut u8).sub(offset) as *mut RutexWaiter)
    }

    fn sleep(&mut self, deadline: Option<Instant>) {
        if let Some(dl) = deadline {
            self.timer_armed = true;
            struct SendPtr(*const RutexWaiter);
            unsafe impl Send for SendPtr {}
            let waiter_ptr = SendPtr(self as *const RutexWaiter);
            Timer::global().schedule(unsafe { &mut *self.timer_id.get() }, dl, move || {
                unsafe { &*waiter_ptr.0 }.wake_by_timer();
            });
        }
        self.switcher.sleep();
    }

    /// Transitions this waiter to `state`, via its switcher. Idempotent:
    /// only the first caller across every wake source observes `true`.
    fn wake(&self, state: u8) -> bool {
        if self.waked.load(Ordering::Acquire) {
            return true;
        }
        self.state.store(state, Ordering::Relaxed);
        if !self.switcher.wake() {
            return false;
        }
        self.waked.store(true, Ordering::Relaxed);
        true
    }

    /// Called from the timer thread when this waiter's deadline fires.
    fn wake_by_timer(&self) {
        let Ok(_guard) = self.wait_mtx.try_lock() else {
            // A notify is in progress (or already finished); let it win.
            return;
        };
        if !self.safe_unlink() {
            return;
        }
        if self.wake(STATE_TIMEOUT) {
            return;
        }
        // `switcher.wake()` returned false: the owning thread has not yet
        // reached `switcher.sleep()` (a narrow window between pushing onto
        // the queue and calling sleep). Back off and retry, exactly as the
        // original's `wake_by_timer` does with `delayMs_ << 1` (ported here
        // as `*2`, since `<< 1` reads as a transcription slip for `*= 2` —
        // shifting a millisecond count left by one bit is the same
        // operation as doubling it, just an unusual way to spell it).
        //
        // SAFETY: we are holding `wait_mtx`, and `join` (the only other
        // thing that could touch `timer_id`/`delay_ms`) blocks
        // unconditionally on the same mutex before touching either.
        unsafe {
            let delay = self.delay_ms.get();
            let next = Instant::now() + Duration::from_millis(*delay);
            *delay = (*delay).saturating_mul(2).max(1);
            Timer::global().reschedule(&mut *self.timer_id.get(), next);
        }
    }

    /// Unlinks this waiter from its owning rutex, if any, using the
    /// lock-then-recheck pattern so it is race-free against a concurrent
    /// `requeue` changing `owner` mid-flight.
    fn safe_unlink(&self) -> bool {
        loop {
            let owner_ptr = self.owner.load(Ordering::Acquire);
            let Some(owner) = NonNull::new(owner_ptr) else {
                return false;
            };
            let owner: &Rutex = unsafe { owner.as_ref() };
            let mut q = owner.waiters.lock().unwrap();
            if self.owner.load(Ordering::Relaxed) == owner_ptr {
                let unlinked = unsafe { q.unlink(self.link_ptr()) };
                self.owner.store(std::ptr::null_mut(), Ordering::Relaxed);
                return unlinked;
            }
            // `owner` changed between the load and taking its lock (a
            // `requeue` moved us elsewhere); retry against the new owner.
        }
    }

    /// Called once, after `sleep` returns. Guarantees that by the time it
    /// returns, no other component (a `notify_one` in flight, or the timer)
    /// still holds a reference to `self`.
    fn join(&mut self) {
        // Suppress any further wake from here on, and let a racing
        // `wake_by_timer`'s `wake()` call return early instead of touching
        // the switcher.
        self.waked.store(true, Ordering::Release);
        self.safe_unlink();

        // Block until any in-flight `notify_one`/`wake_by_timer` that
        // already passed the `waked` check above finishes: both take
        // `wait_mtx` before calling `wake()`, so once we acquire it here,
        // every such call has either completed or will never start.
        let _ = self.wait_mtx.lock().unwrap();

        if self.timer_armed {
            Timer::global().join_unschedule(unsafe { &mut *self.timer_id.get() });
        }
    }
}

/// A routine-level futex: an atomic word plus a FIFO of waiters.
///
/// Like `std::sync::Mutex`, a `Rutex` must not be moved while any waiter is
/// parked on it — waiters keep a raw pointer back to their owning `Rutex`
/// (see [`RutexWaiter::owner`]), which would dangle across a move. In
/// practice every primitive in this crate embeds its `Rutex` directly and
/// is itself never relocated while in use, the same assumption the original
/// makes implicitly through C++ reference semantics.
pub(crate) struct Rutex {
    value: AtomicI32,
    waiters: Mutex<List>,
}

impl Rutex {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicI32::new(0),
            waiters: Mutex::new(List::new()),
        }
    }

    pub(crate) fn value(&self) -> &AtomicI32 {
        &self.value
    }

    pub(crate) fn wait(&self, expected: i32) -> RutexWaitResult {
        self.wait_until(expected, None)
    }

    /// The core wait contract from spec.md §4.5, steps 1–6.
    pub(crate) fn wait_until(&self, expected: i32, deadline: Option<Instant>) -> RutexWaitResult {
        if self.value.load(Ordering::Relaxed) != expected {
            atomic::fence(Ordering::Acquire);
            return RutexWaitResult::WouldBlock;
        }

        let mut waiter = RutexWaiter::new(switcher::current());

        {
            let mut q = self.waiters.lock().unwrap();
            if self.value.load(Ordering::Relaxed) != expected {
                return RutexWaitResult::WouldBlock;
            }

            match waiter.state.load(Ordering::Relaxed) {
                STATE_INTERRUPTED => return RutexWaitResult::Interrupted,
                STATE_READY => return RutexWaitResult::Success,
                _ => {}
            }

            debug_assert!(!unsafe { q.unlink(waiter.link_ptr()) });
            unsafe { q.push(waiter.link_ptr()) };
            waiter.owner.store(self as *const Rutex as *mut Rutex, Ordering::Relaxed);
        }

        waiter.sleep(deadline);
        waiter.join();

        match waiter.state.load(Ordering::Relaxed) {
            STATE_NONE | STATE_INTERRUPTED => RutexWaitResult::Interrupted,
            STATE_TIMEOUT => RutexWaitResult::Timeout,
            _ => RutexWaitResult::Success,
        }
    }

    /// Wakes the head waiter, if any. Returns 1 if a waiter was woken, 0 if
    /// the queue was empty.
    ///
    /// The lock order here — rutex mutex, then waiter mutex — is the other
    /// half of the ABBA pairing with `RutexWaiter::join` (waiter mutex, then
    /// rutex mutex), which is what lets `join` always observe whether a
    /// `notify_one` already claimed this waiter.
    pub(crate) fn notify_one(&self) -> usize {
        loop {
            let mut q = self.waiters.lock().unwrap();
            let Some(node) = q.front() else {
                return 0;
            };
            let waiter = unsafe { RutexWaiter::from_link(node).as_ref() };

            let Ok(guard) = waiter.wait_mtx.try_lock() else {
                // Being joined right now (or the waiter has since moved to
                // a different owner entirely) — skip it, don't spin on it.
                unsafe { q.unlink(node) };
                waiter.owner.store(std::ptr::null_mut(), Ordering::Relaxed);
                continue;
            };

            unsafe { q.unlink(node) };
            waiter.owner.store(std::ptr::null_mut(), Ordering::Relaxed);
            drop(q);
            drop(guard);

            if waiter.wake(STATE_READY) {
                return 1;
            }
            // `wake()` lost the idempotence race to some other source
            // (timer or another notify via requeue); keep looking for
            // another eligible waiter.
        }
    }

    pub(crate) fn notify_all(&self) -> usize {
        let mut n = 0;
        while self.notify_one() == 1 {
            n += 1;
        }
        n
    }

    /// Atomically moves every waiter from `self` to `other`, without waking
    /// any of them. Used by `ConditionVariable::fast_notify_all` to re-park
    /// condvar waiters directly on the associated mutex's rutex.
    pub(crate) fn requeue(&self, other: &Rutex) -> usize {
        let self_addr = self as *const Rutex as usize;
        let other_addr = other as *const Rutex as usize;
        // Lock in address order regardless of which rutex is `self`, so two
        // concurrent requeues in opposite directions can't deadlock.
        let (mut self_lock, mut other_lock) = if self_addr < other_addr {
            let a = self.waiters.lock().unwrap();
            let b = other.waiters.lock().unwrap();
            (a, b)
        } else {
            let b = other.waiters.lock().unwrap();
            let a = self.waiters.lock().unwrap();
            (a, b)
        };

        let mut n = 0;
        loop {
            let Some(node) = self_lock.front() else { break };
            unsafe { self_lock.unlink(node) };
            unsafe { other_lock.push(node) };
            let waiter = unsafe { RutexWaiter::from_link(node).as_ref() };
            waiter.owner.store(other as *const Rutex as *mut Rutex, Ordering::Relaxed);
            n += 1;
        }
        n
    }
}

unsafe impl Send for Rutex {}
unsafe impl Sync for Rutex {}
