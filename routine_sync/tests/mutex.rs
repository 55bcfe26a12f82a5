//! Black-box tests against `routine_sync::Mutex` as an external consumer
//! would use it — no access to the crate's private rutex/waiter internals.

use routine_sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn ping_pong_alternates_to_exactly_one_thousand() {
    // Scenario S1 (spec.md §8): two threads alternately bump a shared
    // counter; each only ever advances it by exactly one, in turn.
    let turn = Arc::new(Mutex::new(0u32));
    let barrier = Arc::new(Barrier::new(2));

    let t1 = {
        let turn = turn.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            loop {
                let mut g = turn.lock();
                if *g >= 1000 {
                    break;
                }
                if *g % 2 == 0 {
                    *g += 1;
                }
                drop(g);
                thread::yield_now();
            }
        })
    };
    let t2 = {
        let turn = turn.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            loop {
                let mut g = turn.lock();
                if *g >= 1000 {
                    break;
                }
                if *g % 2 == 1 {
                    *g += 1;
                }
                drop(g);
                thread::yield_now();
            }
        })
    };

    t1.join().unwrap();
    t2.join().unwrap();
    assert_eq!(*turn.lock(), 1000);
}

#[test]
fn mutual_exclusion_holds_under_heavy_contention() {
    // Property 4 (spec.md §8): no schedule of lock/unlock around a shared
    // counter ever loses or duplicates an increment.
    const THREADS: usize = 16;
    const PER_THREAD: usize = 500;

    let counter = Arc::new(Mutex::new(0u64));
    let observed_max = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let counter = counter.clone();
        let observed_max = observed_max.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..PER_THREAD {
                let mut g = counter.lock();
                *g += 1;
                // While holding the lock, nobody else may be able to push
                // the value past what we just set it to.
                observed_max.fetch_max(*g as usize, Ordering::SeqCst);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*counter.lock(), (THREADS * PER_THREAD) as u64);
    assert_eq!(observed_max.load(Ordering::SeqCst), THREADS * PER_THREAD);
}

#[test]
fn try_lock_never_succeeds_while_held() {
    let m = Arc::new(Mutex::new(()));
    let g = m.lock();
    let m2 = m.clone();
    let h = thread::spawn(move || m2.try_lock().is_some());
    assert!(!h.join().unwrap());
    drop(g);
    assert!(m.try_lock().is_some());
}

#[test]
fn lock_deadline_eventually_succeeds_once_the_holder_releases() {
    let m = Arc::new(Mutex::new(0));
    let g = m.lock();
    let m2 = m.clone();
    let h = thread::spawn(move || m2.lock_timeout(Duration::from_secs(2)).map(|mut g| *g += 1).is_some());
    thread::sleep(Duration::from_millis(50));
    drop(g);
    assert!(h.join().unwrap());
    assert_eq!(*m.lock(), 1);
}
