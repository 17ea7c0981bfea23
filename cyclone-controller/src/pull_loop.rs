//! The controller's pull-loop (spec §4.6): requests tasks from the master,
//! dispatches them into the local queue, reports finishes, heartbeats when
//! idle. Spec.md lists this as an "external collaborator — interface only"
//! in the sense that only its wire-facing behavior is specified; this is
//! the full, runnable implementation of that behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cyclone_core::comm::ControllerEndpoint;
use cyclone_core::error::{Error, Result};
use cyclone_core::generator::ShutdownSignal;
use cyclone_core::msg::Message;
use cyclone_core::queue::Queue;
use cyclone_core::task::{Task, TaskDecoderTable, TaskId};
use tracing::{info, warn};

use crate::worker::WorkerPool;

/// Local task-queue headroom below which the pull-loop requests more work.
/// Kept proportional to `worker_count` so a pool never starves while one
/// controller-wide request is in flight.
fn headroom_target(worker_count: usize) -> usize {
    worker_count.max(1) * 2
}

pub struct PullLoopConfig {
    pub sender_id: String,
    pub worker_count: usize,
    pub request_retry_wait_duration: Duration,
    pub max_num_request_retries: u32,
}

/// Runs the pull-loop until the master sends `EXIT`, draining local state
/// and joining the worker pool before returning (spec §4.6 "on EXIT begin
/// local drain and terminate workers").
pub fn run(
    config: &PullLoopConfig,
    endpoint: &ControllerEndpoint,
    task_queue: &Arc<Queue<Box<dyn Task>>>,
    result_queue: &Arc<Queue<TaskId>>,
    decoders: &TaskDecoderTable,
    worker_shutdown: &ShutdownSignal,
    worker_pool: WorkerPool,
    stop_requested: &Arc<AtomicBool>,
) -> Result<()> {
    let headroom = headroom_target(config.worker_count);

    loop {
        if stop_requested.load(Ordering::SeqCst) {
            return begin_drain(config, endpoint, result_queue, worker_shutdown, worker_pool);
        }

        if drain_one_result(config, endpoint, result_queue)? {
            continue;
        }

        if task_queue.len() < headroom {
            match request_task(config, endpoint)? {
                Some(Message::TaskAssign { task }) => {
                    match decoders.decode(&task) {
                        Ok(decoded) => {
                            if let Err(e) = task_queue.push(decoded) {
                                warn!(tid = %task.tid, error = %e, "local task queue full, dropping assignment");
                            }
                        }
                        Err(e) => warn!(tid = %task.tid, error = %e, "could not decode assigned task"),
                    }
                }
                Some(Message::Wait { duration_seconds }) => {
                    thread::sleep(Duration::from_secs(duration_seconds));
                }
                Some(Message::Exit) => {
                    return begin_drain(config, endpoint, result_queue, worker_shutdown, worker_pool);
                }
                Some(other) => warn!(message = %other, "unexpected reply to TASK_REQUEST"),
                None => {
                    // exhausted retries without a reply; let the next
                    // iteration's endpoint reconnect handle recovery
                }
            }
        } else {
            send_heartbeat(config, endpoint)?;
        }
    }
}

/// Drains exactly one finished `tid`, if any, reporting it to the master.
/// Returns `true` if a message round happened this iteration (so the
/// caller skips the TASK_REQUEST/HEARTBEAT branch, matching the strict
/// one-round-trip-per-iteration discipline of a single synchronous
/// connection).
fn drain_one_result(
    config: &PullLoopConfig,
    endpoint: &ControllerEndpoint,
    result_queue: &Queue<TaskId>,
) -> Result<bool> {
    let tid = match result_queue.try_pop(Duration::from_millis(10)) {
        Ok(Some(tid)) => tid,
        Ok(None) => return Ok(false),
        Err(Error::Timeout) => return Ok(false),
        Err(e) => return Err(e),
    };
    endpoint.send(&Message::TaskFinished {
        sender: config.sender_id.clone(),
        tid: tid.clone(),
    })?;
    match endpoint.recv()? {
        Some(Message::Acknowledge) => {}
        Some(other) => warn!(message = %other, "unexpected reply to TASK_FINISHED"),
        None => warn!(tid, "no reply to TASK_FINISHED within poll_timeout"),
    }
    Ok(true)
}

/// Sends `TASK_REQUEST`, retrying up to `max_num_request_retries` times on a
/// clean receive timeout (ambiguous in spec.md, not covered by the
/// retrieved original source; see DESIGN.md).
fn request_task(config: &PullLoopConfig, endpoint: &ControllerEndpoint) -> Result<Option<Message>> {
    endpoint.send(&Message::TaskRequest {
        sender: config.sender_id.clone(),
    })?;
    for attempt in 0..=config.max_num_request_retries {
        match endpoint.recv()? {
            Some(reply) => return Ok(Some(reply)),
            None if attempt < config.max_num_request_retries => {
                thread::sleep(config.request_retry_wait_duration);
            }
            None => return Ok(None),
        }
    }
    Ok(None)
}

fn send_heartbeat(config: &PullLoopConfig, endpoint: &ControllerEndpoint) -> Result<()> {
    endpoint.send(&Message::Heartbeat {
        sender: config.sender_id.clone(),
    })?;
    match endpoint.recv()? {
        Some(Message::Acknowledge) => Ok(()),
        Some(other) => {
            warn!(message = %other, "unexpected reply to HEARTBEAT");
            Ok(())
        }
        None => Err(Error::transport("no reply to HEARTBEAT within poll_timeout")),
    }
}

fn begin_drain(
    config: &PullLoopConfig,
    endpoint: &ControllerEndpoint,
    result_queue: &Queue<TaskId>,
    worker_shutdown: &ShutdownSignal,
    worker_pool: WorkerPool,
) -> Result<()> {
    info!("master requested EXIT, beginning drain");
    worker_shutdown.trigger();
    // Workers finish whatever they're executing and push its result before
    // noticing `worker_shutdown` and exiting, so joining first guarantees
    // every in-flight result is already queued by the time we drain below.
    worker_pool.join();
    loop {
        let tid = match result_queue.try_pop(Duration::from_millis(50)) {
            Ok(Some(tid)) => tid,
            Ok(None) => break,
            Err(Error::Timeout) => continue,
            Err(e) => return Err(e),
        };
        endpoint.send(&Message::TaskFinished {
            sender: config.sender_id.clone(),
            tid: tid.clone(),
        })?;
        let _ = endpoint.recv()?;
    }
    Ok(())
}
