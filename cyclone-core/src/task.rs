//! Task data model (spec §3): the opaque unit of work, its dispatch-visible
//! status, and the table the master uses to track it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Opaque unique task identifier, `tid` in spec terms. ASCII, at most 64
/// bytes.
pub type TaskId = String;

/// Returns the current wall-clock second, the unit every timestamp in this
/// crate is expressed in (spec §3: "the wall-clock second of the last state
/// transition").
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
}

/// Validates a `tid` against spec §3: ASCII, non-empty, at most 64 bytes.
pub fn validate_tid(tid: &str) -> Result<()> {
    if tid.is_empty() {
        return Err(Error::decode("tid must not be empty"));
    }
    if tid.len() > 64 {
        return Err(Error::decode(format!("tid exceeds 64 bytes: {tid}")));
    }
    if !tid.is_ascii() {
        return Err(Error::decode(format!("tid is not ASCII: {tid}")));
    }
    Ok(())
}

/// A task as it travels the wire: its `tid` plus an opaque, implementation-
/// defined body string. The dispatch core never looks inside `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTask {
    pub tid: TaskId,
    pub body: String,
}

/// A self-contained unit of work. The dispatch core only ever touches
/// [`Task::tid`]; [`Task::execute`] is run by a worker and is otherwise
/// opaque to the rest of the system (spec §3).
pub trait Task: Send {
    /// the task's unique identifier
    fn tid(&self) -> &str;
    /// encodes this task's opaque body for transmission to a controller
    fn encode_body(&self) -> String;
    /// runs the task. Errors are logged by the worker and do not stop the
    /// pool; the task is still reported finished either way (spec §4.5,
    /// §7 `TaskExecuteError`).
    fn execute(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl EncodedTask {
    /// Wraps a raw `(tid, body)` pair without validating `tid`. Used on the
    /// controller side, where tasks arrive pre-validated from the master.
    pub fn new(tid: impl Into<TaskId>, body: impl Into<String>) -> Self {
        Self {
            tid: tid.into(),
            body: body.into(),
        }
    }
}

/// `TaskState` (spec §3): no explicit `Pending` — an unknown `tid` simply has
/// no record in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Assigned,
    Finished,
}

/// Mutable per-`tid` record the master maintains (spec §3). `controller_id`
/// is the sender of the last `TASK_ASSIGN`; `timestamp` is the wall-clock
/// second of the last state transition.
#[derive(Debug, Clone)]
pub struct TaskStatusItem {
    pub tid: TaskId,
    pub state: TaskState,
    pub controller_id: String,
    pub timestamp: u64,
}

impl TaskStatusItem {
    pub fn assigned(tid: TaskId, controller_id: String, timestamp: u64) -> Self {
        Self {
            tid,
            state: TaskState::Assigned,
            controller_id,
            timestamp,
        }
    }
}

/// The master's `tid -> TaskStatusItem` table. Created on first assignment,
/// updated on reassignment/finish, never deleted during a run (spec §3).
#[derive(Debug, Default)]
pub struct TaskStatusTable {
    items: HashMap<TaskId, TaskStatusItem>,
}

impl TaskStatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tid: &str) -> Option<&TaskStatusItem> {
        self.items.get(tid)
    }

    /// Records a (re)assignment of `tid` to `controller_id` at `timestamp`,
    /// overwriting any prior record.
    pub fn assign(&mut self, tid: TaskId, controller_id: String, timestamp: u64) {
        let item = TaskStatusItem::assigned(tid.clone(), controller_id, timestamp);
        self.items.insert(tid, item);
    }

    /// Marks `tid` finished at `timestamp`. Caller is responsible for having
    /// already checked sender attribution (spec §4.7 `TASK_FINISHED`
    /// branch).
    pub fn finish(&mut self, tid: &str, timestamp: u64) {
        if let Some(item) = self.items.get_mut(tid) {
            item.state = TaskState::Finished;
            item.timestamp = timestamp;
        }
    }

    /// Whether the resend threshold (`timestamp + task_resend_timeout`) has
    /// elapsed for the given record, as of `now`.
    pub fn resend_threshold_elapsed(item: &TaskStatusItem, task_resend_timeout: u64, now: u64) -> bool {
        now >= item.timestamp.saturating_add(task_resend_timeout)
    }
}

/// Turns a wire-arrived [`EncodedTask`] back into an executable [`Task`].
/// Concrete task crates (e.g. `demos/cyclone-probe-task`) register one of
/// these; the controller's worker pool stays task-kind-agnostic (spec §4.5
/// "the worker never speaks to the network") by trying each registered
/// decoder in turn.
pub type TaskDecoder = fn(&EncodedTask) -> Result<Box<dyn Task>>;

/// An ordered list of [`TaskDecoder`]s tried in turn. The first one that
/// recognizes the body wins.
#[derive(Default)]
pub struct TaskDecoderTable {
    decoders: Vec<TaskDecoder>,
}

impl TaskDecoderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, decoder: TaskDecoder) {
        self.decoders.push(decoder);
    }

    pub fn decode(&self, encoded: &EncodedTask) -> Result<Box<dyn Task>> {
        for decoder in &self.decoders {
            if let Ok(task) = decoder(encoded) {
                return Ok(task);
            }
        }
        Err(Error::decode(format!(
            "no registered decoder recognizes task {}",
            encoded.tid
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_tid_rejects_empty_long_and_non_ascii() {
        assert!(validate_tid("T1").is_ok());
        assert!(validate_tid("").is_err());
        assert!(validate_tid(&"T".repeat(65)).is_err());
        assert!(validate_tid("T\u{1f600}").is_err());
    }

    #[test]
    fn table_has_no_record_for_unknown_tid() {
        let table = TaskStatusTable::new();
        assert!(table.get("ghost").is_none());
    }

    #[test]
    fn assign_then_finish_updates_state_and_timestamp() {
        let mut table = TaskStatusTable::new();
        table.assign("T1".into(), "c1".into(), 100);
        assert_eq!(table.get("T1").unwrap().state, TaskState::Assigned);
        table.finish("T1", 150);
        let item = table.get("T1").unwrap();
        assert_eq!(item.state, TaskState::Finished);
        assert_eq!(item.timestamp, 150);
        assert_eq!(item.controller_id, "c1");
    }

    #[test]
    fn resend_threshold() {
        let item = TaskStatusItem::assigned("T1".into(), "c1".into(), 100);
        assert!(!TaskStatusTable::resend_threshold_elapsed(&item, 30, 129));
        assert!(TaskStatusTable::resend_threshold_elapsed(&item, 30, 130));
    }
}
