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

//! A bounded, optionally zero-capacity channel built on [`Mutex`] and
//! [`ConditionVariable`].
//!
//! Grounded on `original_source/libgo/routine_sync/channel.h`'s
//! `ChannelImpl`/`ChannelImplWithSignal`, with one deliberate
//! simplification: the original runs two distinct algorithms depending on
//! capacity — a `VecDeque`-backed queue for `cap > 0`, and a pair of raw
//! `T const*`/`T*` "handoff slots" plus a borrowed `ConditionVariable*` for
//! `cap == 0` — and special-cases `nullptr_t` to avoid instantiating the
//! slot machinery over a type with no storage. Here both capacities share
//! one algorithm: a `VecDeque<T>` whose effective capacity is `max(cap, 1)`.
//! What makes `cap == 0` a true rendezvous rather than a 1-deep buffer is
//! that [`Channel::send`] does not return as soon as it deposits its value —
//! it waits a second time, until that value is actually popped back out (or
//! the channel closes underneath it). This reproduces the original's
//! blocking contract without the borrowed-slot machinery, and as a side
//! effect needs no `nullptr_t`/`T` split: [`Channel::close`] always drains
//! whatever is pending and wakes every waiter the same way regardless of
//! `T`, which is what fixes the original's documented bug of a close racing
//! a rendezvous wait leaving the waiting side parked forever for
//! `Channel<nullptr_t>` specifically.
//!
//! `try_send` on a zero-capacity channel only succeeds when a receiver is
//! already blocked waiting (tracked via `waiting_receivers`), matching both
//! the original and `std::sync::mpsc::SyncSender::try_send`'s documented
//! behavior on a zero-capacity `sync_channel`.

use crate::condvar::ConditionVariable;
use crate::error::{RecvError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError};
use crate::mutex::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner<T> {
    queue: VecDeque<T>,
    closed: bool,
    /// Set by `close()` when it evicts a value that was sitting in a
    /// zero-capacity channel's slot, still unconsumed. The blocked `send`
    /// that put it there picks it back up from here to report as a
    /// [`SendError`] instead of leaking it.
    returned_on_close: Option<T>,
    waiting_receivers: usize,
}

/// The channel's shared state, kept behind an `Arc` by [`Channel`] so that
/// cloning a handle is cheap and every clone sees the same queue — the
/// original's `std::shared_ptr<ImplType>` expressed the same way.
struct ChannelShared<T> {
    cap: usize,
    mutex: Mutex<Inner<T>>,
    not_full: ConditionVariable,
    not_empty: ConditionVariable,
}

/// A bounded FIFO channel handle. `Channel::bounded(0)` (equivalently
/// [`Channel::rendezvous`]) is a synchronous handoff: `send` does not
/// return until a `recv` has taken the value. Cloning a `Channel` yields
/// another handle to the same underlying queue, not an independent copy.
pub struct Channel<T>(Arc<ChannelShared<T>>);

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Channel<T> {
    pub fn bounded(cap: usize) -> Self {
        Self(Arc::new(ChannelShared::bounded(cap)))
    }

    pub fn rendezvous() -> Self {
        Self(Arc::new(ChannelShared::bounded(0)))
    }

    pub fn capacity(&self) -> usize {
        self.0.cap
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    pub fn close(&self) {
        self.0.close()
    }

    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.0.send(value)
    }

    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.0.send_timeout(value, timeout)
    }

    pub fn send_deadline(&self, value: T, deadline: Instant) -> Result<(), SendTimeoutError<T>> {
        self.0.send_deadline(value, deadline)
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.0.try_send(value)
    }

    pub fn recv(&self) -> Result<T, RecvError> {
        self.0.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.0.recv_timeout(timeout)
    }

    pub fn recv_deadline(&self, deadline: Instant) -> Result<T, RecvTimeoutError> {
        self.0.recv_deadline(deadline)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.0.try_recv()
    }
}

/// Panics on a closed channel instead of returning a `Result`, for callers
/// who want the original's `operator<<` "throw on failure" ergonomics.
pub fn send_or_panic<T>(channel: &Channel<T>, value: T) {
    channel.send(value).unwrap_or_else(|_| panic!("send on a closed channel"));
}

/// Panics on a closed, empty channel instead of returning a `Result`, for
/// callers who want the original's `operator>>` "throw on failure"
/// ergonomics.
pub fn recv_or_panic<T>(channel: &Channel<T>) -> T {
    channel.recv().unwrap_or_else(|_| panic!("recv on a closed, empty channel"))
}

impl<T> ChannelShared<T> {
    pub fn bounded(cap: usize) -> Self {
        Self {
            cap,
            mutex: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
                returned_on_close: None,
                waiting_receivers: 0,
            }),
            not_full: ConditionVariable::new(),
            not_empty: ConditionVariable::new(),
        }
    }

    pub fn rendezvous() -> Self {
        Self::bounded(0)
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    fn effective_cap(&self) -> usize {
        self.cap.max(1)
    }

    pub fn len(&self) -> usize {
        self.mutex.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.mutex.lock().closed
    }

    /// Marks the channel closed, drains whatever is pending, and wakes
    /// every blocked `send`/`recv`. Idempotent.
    pub fn close(&self) {
        let mut guard = self.mutex.lock();
        guard.closed = true;
        if self.cap == 0 {
            if let Some(v) = guard.queue.pop_front() {
                guard.returned_on_close = Some(v);
            }
        }
        self.not_full.fast_notify_all(&guard);
        self.not_empty.fast_notify_all(&guard);
    }

    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.send_impl(value, None) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(v)) => Err(SendError(v)),
            Err(SendTimeoutError::Timeout(_)) => unreachable!("no deadline was given"),
        }
    }

    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.send_deadline(value, Instant::now() + timeout)
    }

    pub fn send_deadline(&self, value: T, deadline: Instant) -> Result<(), SendTimeoutError<T>> {
        self.send_impl(value, Some(deadline))
    }

    /// Deposits `value` only if room is immediately available (for
    /// `cap == 0`, only if a receiver is already blocked in `recv`). Never
    /// waits.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut guard = self.mutex.lock();
        if guard.closed {
            return Err(TrySendError::Closed(value));
        }
        if self.cap == 0 {
            if guard.waiting_receivers == 0 || !guard.queue.is_empty() {
                return Err(TrySendError::Full(value));
            }
        } else if guard.queue.len() >= self.cap {
            return Err(TrySendError::Full(value));
        }
        guard.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn recv(&self) -> Result<T, RecvError> {
        match self.recv_impl(None) {
            Ok(v) => Ok(v),
            Err(RecvTimeoutError::Closed) => Err(RecvError),
            Err(RecvTimeoutError::Timeout) => unreachable!("no deadline was given"),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.recv_deadline(Instant::now() + timeout)
    }

    pub fn recv_deadline(&self, deadline: Instant) -> Result<T, RecvTimeoutError> {
        self.recv_impl(Some(deadline))
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut guard = self.mutex.lock();
        if let Some(v) = guard.queue.pop_front() {
            self.not_full.notify_one();
            return Ok(v);
        }
        if guard.closed {
            return Err(TryRecvError::Closed);
        }
        Err(TryRecvError::Empty)
    }

    fn send_impl(&self, value: T, deadline: Option<Instant>) -> Result<(), SendTimeoutError<T>> {
        let mut guard = self.mutex.lock();
        loop {
            if guard.closed {
                return Err(SendTimeoutError::Closed(value));
            }

            if guard.queue.len() < self.effective_cap() {
                guard.queue.push_back(value);
                self.not_empty.notify_one();
                if self.cap != 0 {
                    return Ok(());
                }
                return self.await_rendezvous_consumption(guard, deadline);
            }

            match deadline {
                None => {
                    guard = self
                        .not_full
                        .wait_while(guard, |inner| !inner.closed && inner.queue.len() >= self.effective_cap());
                }
                Some(dl) => {
                    let (g, timed_out) = self
                        .not_full
                        .wait_deadline_while(guard, dl, |inner| !inner.closed && inner.queue.len() >= self.effective_cap());
                    guard = g;
                    if timed_out.timed_out() {
                        return Err(SendTimeoutError::Timeout(value));
                    }
                }
            }
        }
    }

    /// Blocks the sender after it has deposited its value into a
    /// zero-capacity channel's slot, until a receiver takes it (`Ok`) or
    /// the channel closes with the value still unconsumed (`Err`, value
    /// recovered from `returned_on_close`).
    fn await_rendezvous_consumption(&self, guard: crate::mutex::MutexGuard<'_, Inner<T>>, deadline: Option<Instant>) -> Result<(), SendTimeoutError<T>> {
        let predicate = |inner: &mut Inner<T>| inner.returned_on_close.is_none() && !inner.queue.is_empty();
        let mut g = match deadline {
            None => self.not_full.wait_while(guard, predicate),
            Some(dl) => {
                let (g, timed_out) = self.not_full.wait_deadline_while(guard, dl, predicate);
                if timed_out.timed_out() && !g.queue.is_empty() && g.returned_on_close.is_none() {
                    // Our value is still sitting there, unclaimed. Reclaim
                    // it so the timed-out caller does not leave a phantom
                    // item for the next receiver.
                    let mut g = g;
                    let v = g.queue.pop_front().expect("checked non-empty above");
                    return Err(SendTimeoutError::Timeout(v));
                }
                g
            }
        };
        if let Some(v) = g.returned_on_close.take() {
            return Err(SendTimeoutError::Closed(v));
        }
        Ok(())
    }

    fn recv_impl(&self, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
        let mut guard = self.mutex.lock();
        loop {
            if let Some(v) = guard.queue.pop_front() {
                self.not_full.notify_one();
                return Ok(v);
            }
            if guard.closed {
                return Err(RecvTimeoutError::Closed);
            }

            guard.waiting_receivers += 1;
            match deadline {
                None => {
                    guard = self.not_empty.wait_while(guard, |inner| inner.queue.is_empty() && !inner.closed);
                    guard.waiting_receivers -= 1;
                }
                Some(dl) => {
                    let (g, timed_out) = self
                        .not_empty
                        .wait_deadline_while(guard, dl, |inner| inner.queue.is_empty() && !inner.closed);
                    guard = g;
                    guard.waiting_receivers -= 1;
                    if timed_out.timed_out() && guard.queue.is_empty() && !guard.closed {
                        return Err(RecvTimeoutError::Timeout);
                    }
                }
            }
        }
    }
}

// `ChannelShared<T>` being `Send + Sync` (for `T: Send`) is what makes
// `Channel<T> = Arc<ChannelShared<T>>`'s auto-derived `Send`/`Sync` sound:
// every access to the `T`s inside goes through `Mutex<Inner<T>>`.
unsafe impl<T: Send> Send for ChannelShared<T> {}
unsafe impl<T: Send> Sync for ChannelShared<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::thread;
    use std::sync::Arc;

    #[test]
    fn bounded_buffer_fifo_order() {
        // Scenario S2 (spec.md §8).
        let ch = Channel::bounded(2);
        ch.send(1).unwrap();
        ch.send(2).unwrap();
        assert!(matches!(ch.try_send(3), Err(TrySendError::Full(3))));
        assert_eq!(ch.recv().unwrap(), 1);
        assert_eq!(ch.recv().unwrap(), 2);
    }

    #[test]
    fn try_recv_on_empty_is_empty_not_closed() {
        let ch: Channel<i32> = Channel::bounded(1);
        assert_eq!(ch.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn rendezvous_send_blocks_until_recv() {
        let ch = Channel::rendezvous();
        let ch2 = ch.clone();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done2 = done.clone();
        let h = thread::spawn(move || {
            ch2.send(42).unwrap();
            done2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(40));
        // send() must still be blocked: nobody has received yet.
        assert!(!done.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(ch.recv().unwrap(), 42);
        h.join().unwrap();
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn rendezvous_try_send_requires_waiting_receiver() {
        let ch: Channel<i32> = Channel::rendezvous();
        assert!(matches!(ch.try_send(1), Err(TrySendError::Full(1))));
    }

    #[test]
    fn close_wakes_blocked_recv() {
        // Scenario S3 (spec.md §8): closing a rendezvous channel while a
        // recv is parked must wake it with a closed error, not hang.
        let ch: Channel<i32> = Channel::rendezvous();
        let ch2 = ch.clone();
        let h = thread::spawn(move || ch2.recv());
        thread::sleep(Duration::from_millis(40));
        ch.close();
        assert_eq!(h.join().unwrap(), Err(RecvError));
    }

    #[test]
    fn close_recovers_unconsumed_rendezvous_value_for_sender() {
        let ch: Channel<i32> = Channel::rendezvous();
        let ch2 = ch.clone();
        let h = thread::spawn(move || ch2.send(7));
        thread::sleep(Duration::from_millis(40));
        ch.close();
        assert_eq!(h.join().unwrap(), Err(SendError(7)));
    }

    #[test]
    fn close_on_unit_channel_does_not_hang() {
        // The original special-cased `nullptr_t` here and left a gap; this
        // must behave identically to any other `T`.
        let ch: Channel<()> = Channel::rendezvous();
        let ch2 = ch.clone();
        let h = thread::spawn(move || ch2.recv());
        thread::sleep(Duration::from_millis(40));
        ch.close();
        assert_eq!(h.join().unwrap(), Err(RecvError));
    }

    #[test]
    fn recv_timeout_on_empty_open_channel() {
        // Scenario S5 (spec.md §8).
        let ch: Channel<i32> = Channel::bounded(1);
        assert_eq!(ch.recv_timeout(Duration::from_millis(30)), Err(RecvTimeoutError::Timeout));
    }

    #[test]
    fn send_timeout_on_full_buffer() {
        let ch: Channel<i32> = Channel::bounded(1);
        ch.send(1).unwrap();
        assert_eq!(ch.send_timeout(2, Duration::from_millis(30)), Err(SendTimeoutError::Timeout(2)));
    }
}
