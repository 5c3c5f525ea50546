//! End-to-end coverage of the topic (Publisher/Subscriber) pattern across
//! real named shared-memory segments. Each test picks a unique logical
//! name so parallel test threads never collide on the same `/dev/shm`
//! entry, and unlinks it on the way out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shmcomm::topic::{Publisher, Subscriber};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "shmcomm_topic_test_{tag}_{}_{}",
        std::process::id(),
        n
    )
}

fn cleanup(name: &str) {
    shmcomm_segment::unlink(&shmcomm_segment::canonical_path(name));
}

/// Scenario 1: basic publish/subscribe round-trip.
#[test]
fn basic_topic_publish_then_subscribe() {
    let name = unique_name("basic");
    let mut publisher = Publisher::<u32>::new(&name).expect("publisher construction");
    publisher.publish(42).expect("publish");

    let mut subscriber = Subscriber::<u32>::new(&name).expect("subscriber construction");
    let (value, ok) = subscriber.subscribe();
    assert!(ok);
    assert_eq!(value, Some(42));

    cleanup(&name);
}

/// A subscriber attached before any publisher exists reports
/// "no data"/disconnected until the publisher shows up and the init
/// handshake completes, then starts returning data.
#[test]
fn subscriber_before_publisher_then_publisher_arrives() {
    let name = unique_name("before_pub");
    let mut subscriber = Subscriber::<u32>::new(&name).expect("subscriber construction");

    let (value, ok) = subscriber.subscribe();
    assert!(!ok);
    assert_eq!(value, None);

    let mut publisher = Publisher::<u32>::new(&name).expect("publisher construction");
    publisher.publish(7).expect("publish");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut observed = None;
    while std::time::Instant::now() < deadline {
        let (value, ok) = subscriber.subscribe();
        if ok {
            observed = value;
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(observed, Some(7));

    cleanup(&name);
}

/// Scenario 5: three publisher threads race to fill a 3-slot ring; a
/// single subscriber loop must see no torn reads (every value it reads
/// equals exactly one published value) and a reasonable fraction of the
/// 3000 total publishes.
#[test]
fn subscriber_sees_no_torn_reads_from_concurrent_publishers() {
    let name = unique_name("concurrent");
    let mut seed = Publisher::<u64>::new(&name).expect("seed publisher");
    seed.publish(0).expect("seed publish");

    const PER_WRITER: u64 = 1000;
    let writer_count = 3u64;

    let handles: Vec<_> = (0..writer_count)
        .map(|writer_id| {
            let name = name.clone();
            std::thread::spawn(move || {
                let mut publisher = Publisher::<u64>::new(&name).expect("publisher");
                for i in 0..PER_WRITER {
                    let value = writer_id * PER_WRITER + i;
                    publisher.publish(value).expect("publish");
                }
            })
        })
        .collect();

    let mut subscriber = Subscriber::<u64>::new(&name).expect("subscriber");
    let mut seen = HashSet::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline && seen.len() < (writer_count * PER_WRITER) as usize {
        let (value, ok) = subscriber.subscribe();
        if let (true, Some(v)) = (ok, value) {
            assert!(v < writer_count * PER_WRITER, "value must be one of the published values");
            seen.insert(v);
        }
        std::thread::sleep(Duration::from_micros(50));
    }

    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let total = (writer_count * PER_WRITER) as f64;
    let coverage = seen.len() as f64 / total;
    assert!(coverage >= 0.8, "expected >=80% coverage, got {coverage}");

    cleanup(&name);
}

/// Scenario 6: segment reinitialization. A subscriber opened before the
/// original publisher must re-attach transparently and observe the new
/// publisher's value after recreation.
#[test]
fn segment_reinitialization_after_unlink() {
    let name = unique_name("reinit");

    {
        let mut publisher = Publisher::<u32>::new(&name).expect("first publisher");
        publisher.publish(105).expect("publish 105");

        let mut early_subscriber = Subscriber::<u32>::new(&name).expect("early subscriber");
        let (value, ok) = early_subscriber.subscribe();
        assert!(ok);
        assert_eq!(value, Some(105));

        // Destroy the publisher and unlink the name so the next create
        // gets fresh memory, per POSIX unlink semantics.
        drop(publisher);
        shmcomm_segment::unlink(&shmcomm_segment::canonical_path(&name));

        let mut publisher2 = Publisher::<u32>::new(&name).expect("second publisher");
        publisher2.publish(210).expect("publish 210");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut observed = None;
        while std::time::Instant::now() < deadline {
            let (value, ok) = early_subscriber.subscribe();
            if ok {
                observed = value;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(observed, Some(210));

        let mut fresh_subscriber = Subscriber::<u32>::new(&name).expect("fresh subscriber");
        let (value, ok) = fresh_subscriber.subscribe();
        assert!(ok);
        assert_eq!(value, Some(210));
    }

    cleanup(&name);
}

/// `wait_for` with no publish activity blocks for roughly the requested
/// timeout rather than returning immediately or hanging.
#[test]
fn wait_for_times_out_within_tolerance() {
    let name = unique_name("wait_timeout");
    let _publisher = Publisher::<u32>::new(&name).expect("publisher");
    let mut subscriber = Subscriber::<u32>::new(&name).expect("subscriber");

    let timeout = Duration::from_millis(100);
    let start = std::time::Instant::now();
    let woke = subscriber.wait_for(timeout.as_micros() as u64);
    let elapsed = start.elapsed();

    assert!(!woke);
    assert!(elapsed >= timeout / 2, "returned too early: {elapsed:?}");
    assert!(elapsed <= timeout * 2, "returned too late: {elapsed:?}");

    cleanup(&name);
}

/// Expiry of zero must never report a slot as expired, no matter how
/// stale it is.
#[test]
fn expiry_zero_disables_expiry_across_processes_view() {
    let name = unique_name("expiry_zero");
    let mut publisher = Publisher::<u32>::new(&name).expect("publisher");
    publisher.publish(9).expect("publish");

    let mut subscriber = Subscriber::<u32>::new(&name).expect("subscriber");
    subscriber.set_data_expiry(0);
    std::thread::sleep(Duration::from_millis(20));

    let (value, ok) = subscriber.subscribe();
    assert!(ok);
    assert_eq!(value, Some(9));

    cleanup(&name);
}
