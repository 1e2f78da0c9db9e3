//! Link behavior across threads.

use rig_common::record::Record;
use rig_engine::{CancelToken, LinkError, RecvError, link};
use std::thread;
use std::time::Duration;

fn sample(t: f64) -> Record {
    Record::stamped(t).with("x", t * 10.0)
}

#[test]
fn records_arrive_in_send_order_across_threads() {
    let mut tx = link("ordered", 1024);
    let rx = tx.subscribe();

    let producer = thread::spawn(move || {
        for i in 0..500 {
            tx.send(sample(i as f64)).unwrap();
        }
    });

    let mut times = Vec::new();
    while let Some(record) = rx.recv() {
        times.push(record.time().unwrap());
    }
    producer.join().unwrap();

    assert_eq!(times.len(), 500);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(rx.dropped(), 0);
}

#[test]
fn fan_out_consumers_see_the_full_sequence() {
    let mut tx = link("fan", 16);
    let fast = tx.subscribe();
    let slow = tx.subscribe();

    for i in 0..5 {
        tx.send(sample(i as f64)).unwrap();
    }
    assert_eq!(fast.recv().unwrap().time(), Some(0.0));
    assert_eq!(fast.recv_last().unwrap().time(), Some(4.0));

    // The second endpoint keeps its own cursor.
    let seen: Vec<f64> = std::iter::from_fn(|| slow.try_recv())
        .filter_map(|r| r.time())
        .collect();
    assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn recv_last_repeats_until_a_new_record_arrives() {
    let mut tx = link("last", 8);
    let rx = tx.subscribe();
    assert!(rx.recv_last().is_none());

    tx.send(sample(1.0)).unwrap();
    tx.send(sample(2.0)).unwrap();
    assert_eq!(rx.recv_last().unwrap().time(), Some(2.0));
    assert_eq!(rx.recv_last().unwrap().time(), Some(2.0));
    assert!(!rx.poll());

    tx.send(sample(3.0)).unwrap();
    assert_eq!(rx.recv_last().unwrap().time(), Some(3.0));
}

#[test]
fn full_queue_drops_the_oldest_records() {
    let mut tx = link("small", 3);
    let rx = tx.subscribe();
    for i in 0..5 {
        tx.send(sample(i as f64)).unwrap();
    }
    assert_eq!(rx.pending(), 3);
    assert_eq!(rx.dropped(), 2);
    assert_eq!(rx.recv().unwrap().time(), Some(2.0));
}

#[test]
fn label_set_is_fixed_by_the_first_record() {
    let mut tx = link("schema", 4);
    let _rx = tx.subscribe();
    tx.send(sample(0.0)).unwrap();
    let err = tx
        .send(Record::stamped(1.0).with("y", 1.0))
        .unwrap_err();
    assert!(matches!(err, LinkError::LabelMismatch { .. }));
    assert_eq!(tx.sent(), 1);
}

#[test]
fn closing_wakes_a_blocked_consumer() {
    let mut tx = link("closing", 4);
    let rx = tx.subscribe();
    let consumer = thread::spawn(move || rx.recv());
    thread::sleep(Duration::from_millis(20));
    tx.close();
    assert!(consumer.join().unwrap().is_none());
}

#[test]
fn cancel_interrupts_a_blocked_receive() {
    let mut tx = link("idle", 4);
    let rx = tx.subscribe();
    let cancel = CancelToken::new();
    let waiter = {
        let cancel = cancel.clone();
        thread::spawn(move || rx.recv_cancellable(&cancel))
    };
    thread::sleep(Duration::from_millis(20));
    cancel.cancel();
    assert_eq!(waiter.join().unwrap().unwrap_err(), RecvError::Cancelled);
    drop(tx);
}
