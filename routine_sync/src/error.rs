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

//! Error and result taxonomy for the rutex layer and the primitives on top
//! of it. Nothing here is exceptional in the `panic!` sense: a rutex wait
//! returning [`RutexWaitResult::WouldBlock`] is the expected outcome of a
//! racing writer, not a failure.

use core::fmt;

/// Outcome of a single rutex wait attempt.
///
/// Mirrors `libgo::Rutex::rutex_wait_return` from the original
/// implementation one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RutexWaitResult {
    /// Woken by a matching `notify_one`/`notify_all`/`requeue`.
    Success,
    /// The deadline passed before a wake arrived.
    Timeout,
    /// The rutex's value no longer matched the caller's expectation; the
    /// caller never parked and should re-check its predicate.
    WouldBlock,
    /// Woken by an external cancellation rather than a notify or a timer.
    Interrupted,
}

impl RutexWaitResult {
    /// True for the two outcomes that mean "the wait returned without the
    /// value changing the way the caller expected" (timeout or would-block).
    #[inline]
    pub fn is_would_block_or_timeout(self) -> bool {
        matches!(self, Self::WouldBlock | Self::Timeout)
    }
}

impl fmt::Display for RutexWaitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::WouldBlock => "would block",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Returned by [`crate::channel::Channel::send`] when the channel was
/// already closed. Carries the value back so the caller does not lose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("send on a closed channel")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Returned by [`crate::channel::Channel::recv`] when the channel is closed
/// and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvError;

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("recv on a closed, empty channel")
    }
}

impl std::error::Error for RecvError {}

/// Returned by [`crate::channel::Channel::try_send`]. Named and shaped after
/// `std::sync::mpsc::TrySendError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel has no free slot right now (for a rendezvous channel:
    /// no receiver is currently waiting).
    Full(T),
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(t) | Self::Closed(t) => t,
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("channel is full"),
            Self::Closed(_) => f.write_str("send on a closed channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Returned by [`crate::channel::Channel::try_recv`]. Named and shaped after
/// `std::sync::mpsc::TryRecvError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("channel is empty"),
            Self::Closed => f.write_str("recv on a closed, empty channel"),
        }
    }
}

impl std::error::Error for TryRecvError {}

/// Returned by [`crate::channel::Channel::send_deadline`]/`send_timeout`.
/// Named and shaped after `crossbeam_channel::SendTimeoutError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    Timeout(T),
    Closed(T),
}

impl<T> SendTimeoutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(t) | Self::Closed(t) => t,
        }
    }
}

impl<T> fmt::Display for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("timed out sending on channel"),
            Self::Closed(_) => f.write_str("send on a closed channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for SendTimeoutError<T> {}

/// Returned by [`crate::channel::Channel::recv_deadline`]/`recv_timeout`.
/// Mirrors `std::sync::mpsc::RecvTimeoutError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out receiving from channel"),
            Self::Closed => f.write_str("recv on a closed, empty channel"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}
