//! Dispatch-loop scenario tests (spec §8 S1-S6), exercised directly against
//! [`Dispatcher`] — no socket needed, since the dispatch loop's testable
//! unit is "given this inbox event, what reply and what state mutation".

use cyclone_core::error::Error;
use cyclone_core::msg::Message;
use cyclone_core::queue::Queue;
use cyclone_core::task::EncodedTask;

use crate::dispatch::{Dispatcher, DispatcherConfig};

fn dispatcher(wait_duration: u64, resend_timeout: u64) -> Dispatcher {
    Dispatcher::new(DispatcherConfig {
        controller_timeout: 60,
        controller_wait_duration: wait_duration,
        task_resend_timeout: resend_timeout,
    })
}

fn task_request(sender: &str) -> Message {
    Message::TaskRequest {
        sender: sender.to_string(),
    }
}

fn task_finished(sender: &str, tid: &str) -> Message {
    Message::TaskFinished {
        sender: sender.to_string(),
        tid: tid.to_string(),
    }
}

#[test]
fn s1_happy_path() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);
    task_queue.push(EncodedTask::new("T1", "body")).unwrap();

    let reply = d
        .handle_message(100, &task_request("C1"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(
        reply,
        Message::TaskAssign {
            task: EncodedTask::new("T1", "body")
        }
    );

    let reply = d
        .handle_message(101, &task_finished("C1", "T1"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Acknowledge);
    assert_eq!(result_queue.pop_blocking(), "T1");
}

#[test]
fn s2_empty_queue_wait() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);

    let reply = d
        .handle_message(100, &task_request("C1"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Wait { duration_seconds: 5 });
    assert!(d.is_distributing());
}

#[test]
fn s3_duplicate_protection() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);
    task_queue.push(EncodedTask::new("T2", "body")).unwrap();

    let reply = d
        .handle_message(100, &task_request("C1"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(
        reply,
        Message::TaskAssign {
            task: EncodedTask::new("T2", "body")
        }
    );

    // generator re-pushes T2 (bug upstream)
    task_queue.push(EncodedTask::new("T2", "body")).unwrap();

    // C2 requests within task_resend_timeout: WAIT
    let reply = d
        .handle_message(110, &task_request("C2"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Wait { duration_seconds: 5 });

    // T2 was discarded, not re-enqueued (spec §9 open question resolution)
    assert!(task_queue.is_empty());

    // generator re-pushes T2 again; C2 requests after resend_timeout elapses
    task_queue.push(EncodedTask::new("T2", "body")).unwrap();
    let reply = d
        .handle_message(131, &task_request("C2"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(
        reply,
        Message::TaskAssign {
            task: EncodedTask::new("T2", "body")
        }
    );
}

#[test]
fn s4_finish_mismatch_does_not_mutate_state() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);
    task_queue.push(EncodedTask::new("T2", "body")).unwrap();
    d.handle_message(100, &task_request("C1"), &task_queue, &result_queue, || true)
        .unwrap();
    task_queue.push(EncodedTask::new("T2", "body")).unwrap();
    d.handle_message(131, &task_request("C2"), &task_queue, &result_queue, || true)
        .unwrap();

    // late TASK_FINISHED(T2) from C1, the original holder
    let reply = d
        .handle_message(140, &task_finished("C1", "T2"), &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Acknowledge);
    assert!(result_queue.is_empty());
}

#[test]
fn s5_graceful_shutdown_drains_to_completion() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);

    // register two controllers first
    d.handle_message(100, &task_request("C1"), &task_queue, &result_queue, || true)
        .unwrap();
    d.handle_message(100, &task_request("C2"), &task_queue, &result_queue, || true)
        .unwrap();

    d.stop_task_distribution();
    assert!(!d.is_drained());

    let reply = d
        .handle_message(101, &Message::Heartbeat { sender: "C1".into() }, &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Exit);
    assert!(!d.is_drained());

    let reply = d
        .handle_message(101, &Message::Heartbeat { sender: "C2".into() }, &task_queue, &result_queue, || true)
        .unwrap();
    assert_eq!(reply, Message::Exit);
    assert!(d.is_drained());
}

#[test]
fn s6_generator_finishes_naturally_flips_distribution_off() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);

    let reply = d
        .handle_message(100, &task_request("C1"), &task_queue, &result_queue, || false)
        .unwrap();
    assert_eq!(reply, Message::Wait { duration_seconds: 0 });
    assert!(!d.is_distributing());

    let reply = d
        .handle_message(101, &task_request("C1"), &task_queue, &result_queue, || false)
        .unwrap();
    assert_eq!(reply, Message::Exit);
}

#[test]
fn message_with_no_sender_is_a_decode_error() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);
    let err = d
        .handle_message(100, &Message::Acknowledge, &task_queue, &result_queue, || true)
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn unknown_tid_on_task_finished_is_fatal() {
    let mut d = dispatcher(5, 30);
    let task_queue: Queue<EncodedTask> = Queue::bounded(16);
    let result_queue = Queue::bounded(16);
    let err = d
        .handle_message(100, &task_finished("C1", "ghost"), &task_queue, &result_queue, || true)
        .unwrap_err();
    assert!(matches!(err, Error::Inconsistency(_)));
}

#[test]
fn record_error_stops_distribution_and_reports_terminal_threshold() {
    let mut d = dispatcher(5, 30);
    for _ in 0..99 {
        assert!(!d.record_error(&Error::Transport("x".into())));
    }
    assert!(!d.is_distributing());
    assert!(d.record_error(&Error::Transport("x".into())));
}
