//! Model-checked interleavings of `ConditionVariable`'s wait/notify path.
//!
//! Build and run with `RUSTFLAGS="--cfg loom" cargo test --release --test
//! loom_condvar`. Deliberately avoids every deadline-based API (`wait_timeout`
//! and friends route through the process-wide `Timer` background thread,
//! which loom cannot model across iterations) — only the plain `wait`/
//! `notify_*`/`fast_notify_all` paths are exercised here.
#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;
use routine_sync::{ConditionVariable, Mutex};

#[test]
fn notify_all_wakes_every_predicate_waiter() {
    loom::model(|| {
        let state = Arc::new(Mutex::new(false));
        let cv = Arc::new(ConditionVariable::new());

        let state2 = state.clone();
        let cv2 = cv.clone();
        let waiter = thread::spawn(move || {
            let guard = state2.lock();
            let _guard = cv2.wait_while(guard, |ready| !*ready);
        });

        let mut g = state.lock();
        *g = true;
        cv.notify_all();
        drop(g);

        waiter.join().unwrap();
    });
}

#[test]
fn fast_notify_all_requeues_a_single_waiter_without_losing_it() {
    loom::model(|| {
        let mutex = Arc::new(Mutex::new(0u32));
        let cv = Arc::new(ConditionVariable::new());

        let held = mutex.lock();
        let mutex2 = mutex.clone();
        let cv2 = cv.clone();
        let waiter = thread::spawn(move || {
            let guard = mutex2.lock();
            let _guard = cv2.wait(guard);
        });

        cv.fast_notify_all(&held);
        drop(held);

        waiter.join().unwrap();
    });
}
