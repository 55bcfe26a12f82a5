//! Black-box tests against `routine_sync::Channel` as an external consumer
//! would use it.

use routine_sync::{Channel, RecvTimeoutError, SendError};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;

#[test]
fn bounded_buffer_multi_producer_multi_consumer_preserves_multiset() {
    // Scenario S2 (spec.md §8): capacity-4 channel, 3 producers each push
    // 0..99, 2 consumers drain until 300 items; the received multiset must
    // equal the pushed multiset, and each producer's own values must arrive
    // at every consumer in non-decreasing order relative to each other.
    const PER_PRODUCER: i32 = 100;
    const PRODUCERS: i32 = 3;

    let ch = Channel::bounded(4);
    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let ch = ch.clone();
        producers.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                ch.send((p, i)).unwrap();
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let ch = ch.clone();
        consumers.push(thread::spawn(move || {
            let mut received = Vec::new();
            loop {
                match ch.recv_timeout(Duration::from_millis(500)) {
                    Ok(v) => received.push(v),
                    Err(_) => break,
                }
            }
            received
        }));
    }

    for p in producers {
        p.join().unwrap();
    }
    ch.close();

    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.join().unwrap());
    }
    assert_eq!(all.len(), (PER_PRODUCER * PRODUCERS) as usize);

    // Per-producer order must survive the fan-in, even though which
    // consumer a given item lands on is not deterministic: group by
    // producer and check each sub-sequence is strictly increasing.
    let mut by_producer: HashMap<i32, Vec<i32>> = HashMap::new();
    for (p, i) in all.iter().copied() {
        by_producer.entry(p).or_default().push(i);
    }
    assert_eq!(by_producer.len(), PRODUCERS as usize);
    for (_, seq) in by_producer {
        assert_eq!(seq, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn rendezvous_delivers_each_value_to_exactly_one_pop_in_push_order() {
    // Property 6 (spec.md §8).
    let ch: Channel<i32> = Channel::rendezvous();
    let ch2 = ch.clone();
    let producer = thread::spawn(move || {
        for i in 0..20 {
            ch2.send(i).unwrap();
        }
    });

    let mut received = Vec::new();
    for _ in 0..20 {
        received.push(ch.recv().unwrap());
    }
    producer.join().unwrap();
    assert_eq!(received, (0..20).collect::<Vec<_>>());
}

#[test]
fn close_drains_then_fails_both_directions() {
    // Property 7 (spec.md §8): after close on a buffered channel holding k
    // items, the next k pops succeed in order, then pops and pushes fail.
    let ch = Channel::bounded(8);
    for i in 0..5 {
        ch.send(i).unwrap();
    }
    ch.close();

    assert_eq!(ch.send(99), Err(SendError(99)));

    for expected in 0..5 {
        assert_eq!(ch.recv().unwrap(), expected);
    }
    assert!(ch.recv().is_err());
}

#[test]
fn timed_pop_on_empty_channel_then_succeeds_once_pushed() {
    // Scenario S5 (spec.md §8).
    let ch: Channel<i32> = Channel::bounded(1);
    assert_eq!(ch.recv_timeout(Duration::from_millis(50)), Err(RecvTimeoutError::Timeout));
    ch.send(7).unwrap();
    assert_eq!(ch.recv_timeout(Duration::from_millis(50)), Ok(7));
}

#[test]
fn rendezvous_close_unblocks_a_parked_receiver_quickly() {
    // Scenario S3 (spec.md §8): close must wake a blocked recv within a
    // small bound, not leave it parked.
    let ch: Channel<i32> = Channel::rendezvous();
    let ch2 = ch.clone();
    let h = thread::spawn(move || ch2.recv());

    thread::sleep(Duration::from_millis(30));
    let started = std::time::Instant::now();
    ch.close();
    let result = h.join().unwrap();
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_millis(50));
}
