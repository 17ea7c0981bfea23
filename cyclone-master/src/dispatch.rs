//! The master dispatch loop (spec §4.7) — the system's core. [`Dispatcher`]
//! is the pure state machine (no I/O), driven by [`run`] against a real
//! [`MasterEndpoint`]. Keeping the two separate means the scenarios in
//! spec §8 can be exercised directly against [`Dispatcher`] without a
//! socket, matching the `src/tests/` layout the two `linksense` binaries
//! use for their own core-loop tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cyclone_core::comm::MasterEndpoint;
use cyclone_core::error::{Error, Result};
use cyclone_core::generator::ShutdownSignal;
use cyclone_core::msg::Message;
use cyclone_core::queue::Queue;
use cyclone_core::task::{now_secs, EncodedTask, TaskId, TaskState, TaskStatusTable};
use tracing::{error, warn};

/// `max_error_count` from spec §4.7/§7: the dispatch loop terminates once
/// this many iterations have raised an error.
pub const MAX_ERROR_COUNT: u32 = 100;

/// Tunables the dispatch loop needs beyond the comm/queue handles (spec
/// §4.7's `controller_timeout`, `controller_wait_duration`,
/// `task_resend_timeout`, `poll_timeout_ms`).
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub controller_timeout: u64,
    pub controller_wait_duration: u64,
    pub task_resend_timeout: u64,
}

/// The pure task-dispatch state machine of spec §4.7, with no knowledge of
/// sockets or threads: fed one message (or one timeout tick) at a time,
/// produces the reply to send and mutates its own bookkeeping.
pub struct Dispatcher {
    controller_timeout: u64,
    wait_duration: u64,
    task_resend_timeout: u64,
    task_distribution: bool,
    task_status: TaskStatusTable,
    controller_heartbeat: HashMap<String, u64>,
    error_count: u32,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            controller_timeout: config.controller_timeout,
            wait_duration: config.controller_wait_duration,
            task_resend_timeout: config.task_resend_timeout,
            task_distribution: true,
            task_status: TaskStatusTable::new(),
            controller_heartbeat: HashMap::new(),
            error_count: 0,
        }
    }

    pub fn is_distributing(&self) -> bool {
        self.task_distribution
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Flips distribution off (spec §4.7: SIGHUP/SIGINT/SIGTERM and the two
    /// other causes all funnel through this).
    pub fn stop_task_distribution(&mut self) {
        self.task_distribution = false;
    }

    /// True once distribution has stopped and every controller has been
    /// pruned from the heartbeat map (spec §4.9 step 4).
    pub fn is_drained(&self) -> bool {
        !self.task_distribution && self.controller_heartbeat.is_empty()
    }

    /// Handles one received message, returning the reply to send. `now` is
    /// the current wall-clock second (spec §4.7 "now = current second").
    pub fn handle_message(
        &mut self,
        now: u64,
        message: &Message,
        task_queue: &Queue<EncodedTask>,
        result_queue: &Queue<TaskId>,
        generator_alive: impl FnOnce() -> bool,
    ) -> Result<Message> {
        let sender = message
            .sender()
            .ok_or_else(|| Error::decode("message carries no sender"))?
            .to_string();
        self.controller_heartbeat.insert(sender.clone(), now);

        if !self.task_distribution {
            self.controller_heartbeat.remove(&sender);
            return Ok(Message::Exit);
        }

        match message {
            Message::TaskRequest { .. } => {
                self.handle_task_request(now, &sender, task_queue, generator_alive)
            }
            Message::TaskFinished { tid, .. } => {
                self.handle_task_finished(now, &sender, tid, result_queue)
            }
            Message::Heartbeat { .. } => Ok(Message::Acknowledge),
            other => Err(Error::inconsistency(format!(
                "unexpected message type {other} from {sender}"
            ))),
        }
    }

    fn handle_task_request(
        &mut self,
        now: u64,
        sender: &str,
        task_queue: &Queue<EncodedTask>,
        generator_alive: impl FnOnce() -> bool,
    ) -> Result<Message> {
        let popped = match task_queue.try_pop(Duration::from_secs(1)) {
            Ok(popped) => popped,
            // lock contention on the 1-second try-acquire: neither "empty"
            // nor "has a task" could be determined, so fall through to the
            // same reply an empty queue would get without touching the
            // generator-liveness / distribution-off path (we have no basis
            // to decide that without the lock).
            Err(Error::Timeout) => return Ok(Message::Wait {
                duration_seconds: self.wait_duration,
            }),
            Err(e) => return Err(e),
        };

        let Some(task) = popped else {
            if !generator_alive() {
                self.task_distribution = false;
                self.wait_duration = 0;
            }
            return Ok(Message::Wait {
                duration_seconds: self.wait_duration,
            });
        };

        match self.task_status.get(&task.tid) {
            None => {
                self.task_status.assign(task.tid.clone(), sender.to_string(), now);
                Ok(Message::TaskAssign { task })
            }
            Some(rec) => {
                let resend_threshold = rec.timestamp.saturating_add(self.task_resend_timeout);
                if rec.state == TaskState::Finished || now >= resend_threshold {
                    self.task_status.assign(task.tid.clone(), sender.to_string(), now);
                    Ok(Message::TaskAssign { task })
                } else if rec.state == TaskState::Assigned && now < resend_threshold {
                    Ok(Message::Wait {
                        duration_seconds: self.wait_duration,
                    })
                } else {
                    Err(Error::inconsistency(format!(
                        "undefined task_status combination for tid {}",
                        task.tid
                    )))
                }
            }
        }
    }

    fn handle_task_finished(
        &mut self,
        now: u64,
        sender: &str,
        tid: &str,
        result_queue: &Queue<TaskId>,
    ) -> Result<Message> {
        match self.task_status.get(tid) {
            None => Err(Error::inconsistency(format!(
                "TASK_FINISHED for unknown tid {tid}"
            ))),
            Some(rec) if rec.controller_id == sender => {
                self.task_status.finish(tid, now);
                result_queue.push(tid.to_string())?;
                Ok(Message::Acknowledge)
            }
            Some(rec) => {
                warn!(
                    tid,
                    sender,
                    assignee = %rec.controller_id,
                    "TASK_FINISHED sender mismatch, acknowledging without mutating state"
                );
                Ok(Message::Acknowledge)
            }
        }
    }

    /// Called on a clean receive timeout (spec §4.7 step 4): while draining,
    /// prune any controller idle past `controller_timeout`.
    pub fn handle_poll_timeout(&mut self, now: u64) {
        if !self.task_distribution {
            let controller_timeout = self.controller_timeout;
            self.controller_heartbeat
                .retain(|_, last_seen| now < last_seen.saturating_add(controller_timeout));
        }
    }

    /// Per-iteration exception envelope (spec §4.7/§7): increments the error
    /// counter, stops distribution, and reports whether the loop must now
    /// terminate (`error_count` reached `max_error_count`).
    pub fn record_error(&mut self, err: &Error) -> bool {
        self.error_count += 1;
        error!(error = %err, error_count = self.error_count, "dispatch loop iteration failed");
        self.stop_task_distribution();
        self.error_count >= MAX_ERROR_COUNT
    }
}

/// Drives a [`Dispatcher`] against a real [`MasterEndpoint`] until drained
/// (spec §4.7/§4.9). `shutdown_requested` is flipped by the SIGHUP/SIGINT/
/// SIGTERM signal thread; it is checked once per poll-timeout tick, which
/// bounds signal-to-reaction latency by `poll_timeout` exactly as the
/// receive call itself is bounded.
pub fn run(
    dispatcher: &mut Dispatcher,
    endpoint: &MasterEndpoint,
    task_queue: &Queue<EncodedTask>,
    result_queue: &Queue<TaskId>,
    poll_timeout: Duration,
    shutdown_requested: &Arc<AtomicBool>,
    generator_alive: &dyn Fn() -> bool,
) {
    loop {
        if shutdown_requested.load(Ordering::SeqCst) {
            dispatcher.stop_task_distribution();
        }

        match endpoint.recv_timeout(poll_timeout) {
            Ok(Some(envelope)) => {
                let now = now_secs();
                let message = envelope.message.clone();
                let result = dispatcher.handle_message(now, &message, task_queue, result_queue, || {
                    generator_alive()
                });
                match result {
                    Ok(reply) => {
                        if let Err(e) = envelope.reply(reply) {
                            warn!(error = %e, "failed to deliver reply, connection likely closed");
                        }
                    }
                    Err(e) => {
                        let terminate = dispatcher.record_error(&e);
                        // still owe a reply to keep that connection's socket
                        // balanced (spec §7 DecodeError note)
                        let _ = envelope.reply(Message::Acknowledge);
                        if terminate {
                            return;
                        }
                    }
                }
            }
            Ok(None) => {
                dispatcher.handle_poll_timeout(now_secs());
            }
            Err(e) => {
                if dispatcher.record_error(&e) {
                    return;
                }
            }
        }

        if dispatcher.is_drained() {
            return;
        }
    }
}
