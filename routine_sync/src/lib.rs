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

//! Routine-synchronization primitives for a coroutine library: a mutex, a
//! condition variable, bounded and rendezvous channels, and the timer
//! service they all share — every one of them built on a rutex (a
//! routine-level futex) that parks either an OS thread or a host-supplied
//! coroutine, depending on which [`switcher::Switcher`] claims the calling
//! context.
//!
//! A process that never registers a coroutine switcher gets a perfectly
//! ordinary thread-blocking sync library (the `thread` feature, on by
//! default, is all that is needed). A coroutine scheduler that wants its
//! routines to park instead of blocking their carrier thread implements
//! [`switcher::RoutineSwitcher`] and calls [`register_switchers`] once at
//! startup; everything above the rutex layer is then routine-aware with no
//! further changes.
//!
//! ```
//! use routine_sync::Mutex;
//!
//! let m = Mutex::new(0);
//! *m.lock() += 1;
//! assert_eq!(*m.lock(), 1);
//! ```

mod compat;
mod error;
mod list;
mod rutex;
mod skiplist;

pub mod channel;
pub mod condvar;
pub mod mutex;
pub mod switcher;
pub mod timer;

pub use channel::{recv_or_panic, send_or_panic, Channel};
pub use condvar::{ConditionVariable, WaitTimeoutResult};
pub use error::{RecvError, RecvTimeoutError, RutexWaitResult, SendError, SendTimeoutError, TryRecvError, TrySendError};
pub use mutex::{Mutex, MutexGuard};
pub use switcher::{register_switchers_impl, RoutineSwitcher, Switcher};
pub use timer::Timer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::thread;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn mutex_and_condvar_compose_into_a_bounded_queue() {
        // A minimal end-to-end smoke test exercising mutex + condvar +
        // channel together, the way a real caller would use this crate.
        let queue: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let cv = Arc::new(ConditionVariable::new());
        let ch = Channel::bounded(4);

        let q2 = queue.clone();
        let cv2 = cv.clone();
        let ch2 = ch.clone();
        let producer = thread::spawn(move || {
            for i in 0..4 {
                ch2.send(i).unwrap();
            }
            let mut g = q2.lock();
            g.push(-1);
            cv2.notify_one();
        });

        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(ch.recv().unwrap());
        }
        producer.join().unwrap();

        let g = cv.wait_while(queue.lock(), |v| v.is_empty());
        assert_eq!(*g, vec![-1]);
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn timer_fires_a_scheduled_callback() {
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let mut id = timer::TimerId::new();
        Timer::global().schedule(&mut id, Timer::now() + Duration::from_millis(30), move || {
            fired2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        Timer::global().join_unschedule(&mut id);
    }
}
