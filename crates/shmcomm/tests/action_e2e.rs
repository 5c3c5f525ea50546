//! End-to-end coverage of the action (goal/feedback/result/cancel)
//! pattern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shmcomm::action::{Client, Server, Status};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_name(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("shmcomm_action_test_{tag}_{}_{}", std::process::id(), n)
}

fn cleanup(name: &str) {
    shmcomm_segment::unlink(&shmcomm_segment::canonical_path(name));
}

/// Scenario 3: goal accepted, feedback streamed at intervals, then a
/// result is published; the client polls feedback while waiting for the
/// result and ends up observing SUCCEEDED with the expected value.
#[test]
fn action_feedback_then_completion() {
    let name = unique_name("feedback_completion");

    let server_name = name.clone();
    let server_thread = std::thread::spawn(move || {
        let mut server = Server::<u32, f32, u32>::new(&server_name).expect("server construction");
        server.wait_new_goal();
        let goal = server.accept_new_goal();
        assert_eq!(goal, 5);

        for fraction in [0.0f32, 0.33, 0.66] {
            server.publish_feedback(fraction);
            std::thread::sleep(Duration::from_millis(20));
        }
        server.publish_result(goal * 2);
    });

    // Give the server a moment to create and initialize the segment
    // before the client attaches, mirroring `wait_for_server` usage.
    std::thread::sleep(Duration::from_millis(20));

    let mut client = Client::<u32, f32, u32>::new(&name).expect("client construction");
    assert!(client.wait_for_server(2_000_000));
    assert!(client.send_goal(5));

    let mut last_feedback = None;
    let mut completed = false;
    for _ in 0..20 {
        if client.wait_for_result(20_000) {
            completed = true;
            break;
        }
        if let Some(fb) = client.get_feedback() {
            last_feedback = Some(fb);
        }
    }

    assert!(completed, "expected the result wait to eventually succeed");
    assert_eq!(client.get_status(), Some(Status::Succeeded));
    assert_eq!(client.get_result(), Some(10));
    assert!(last_feedback.is_some(), "expected to observe at least one feedback sample");

    server_thread.join().expect("server thread panicked");
    cleanup(&name);
}

/// Scenario 4: the client sends a goal, waits, then cancels it; the
/// server observes the preempt request and transitions to PREEMPTED,
/// which the client in turn observes.
#[test]
fn action_cancellation_preempts_the_goal() {
    let name = unique_name("cancellation");

    let server_name = name.clone();
    let server_thread = std::thread::spawn(move || {
        let mut server = Server::<u32, u32, u32>::new(&server_name).expect("server construction");
        server.wait_new_goal();
        let _goal = server.accept_new_goal();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if server.is_preempt_requested() {
                server.set_preempted();
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("server never observed the preempt request");
    });

    std::thread::sleep(Duration::from_millis(20));
    let mut client = Client::<u32, u32, u32>::new(&name).expect("client construction");
    assert!(client.wait_for_server(2_000_000));
    assert!(client.send_goal(1));

    std::thread::sleep(Duration::from_millis(50));
    client.cancel_goal();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let mut observed = None;
    while std::time::Instant::now() < deadline {
        if client.wait_for_result(20_000) {
            observed = client.get_status();
            break;
        }
    }
    assert_eq!(observed, Some(Status::Preempted));

    server_thread.join().expect("server thread panicked");
    cleanup(&name);
}

/// A freshly constructed server starts idle (SUCCEEDED), per the status
/// machine's initial state.
#[test]
fn fresh_server_starts_succeeded() {
    let name = unique_name("fresh_status");
    let _server = Server::<u32, u32, u32>::new(&name).expect("server construction");
    let mut client = Client::<u32, u32, u32>::new(&name).expect("client construction");
    assert!(client.wait_for_server(2_000_000));
    assert_eq!(client.get_status(), Some(Status::Succeeded));

    cleanup(&name);
}

/// Rejecting a goal transitions status to REJECTED and wakes any client
/// waiting on the result channel.
#[test]
fn reject_new_goal_transitions_to_rejected() {
    let name = unique_name("reject");

    let server_name = name.clone();
    let server_thread = std::thread::spawn(move || {
        let mut server = Server::<u32, u32, u32>::new(&server_name).expect("server construction");
        server.wait_new_goal();
        server.reject_new_goal();
    });

    std::thread::sleep(Duration::from_millis(20));
    let mut client = Client::<u32, u32, u32>::new(&name).expect("client construction");
    assert!(client.wait_for_server(2_000_000));
    assert!(client.send_goal(3));
    assert!(client.wait_for_result(2_000_000));
    assert_eq!(client.get_status(), Some(Status::Rejected));

    server_thread.join().expect("server thread panicked");
    cleanup(&name);
}
