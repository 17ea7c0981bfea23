//! The controller-side worker pool (spec §4.5). `worker_count` identical
//! workers share one local task queue, one local result queue, and one
//! worker-state table. Workers never touch the network (spec §4.5 "only
//! the controller pull-loop does"); only `cyclone_core::task::TaskDecoder`s
//! and `Task::execute` are task-kind-specific.
//!
//! **(REDESIGN, recorded in DESIGN.md)** Runs as supervised OS threads
//! rather than `multiprocessing.Process` children (`examples/original_source/worker.py`):
//! an ordinary `Arc<Mutex<...>>` already gives every thread the same view
//! of the state table without a `multiprocessing.RawArray`-equivalent
//! shared-memory segment.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cyclone_core::error::Error;
use cyclone_core::generator::ShutdownSignal;
use cyclone_core::queue::Queue;
use cyclone_core::task::{now_secs, Task, TaskId};
use cyclone_core::worker_table::{WorkerState, WorkerTable};
use tracing::{debug, warn};

/// How often an idle worker re-checks the shutdown flag while waiting for a
/// task (spec §4.5 step 4: "on run_flag false at the top of the loop").
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A running pool of worker threads. Dropping this without calling
/// [`WorkerPool::join`] simply detaches the threads; `join` is the normal,
/// intended path out (spec §4.9's drain sequence joins workers before the
/// pull-loop exits).
pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` worker threads, each running the lifecycle of
    /// spec §4.5.
    pub fn spawn(
        worker_count: usize,
        task_queue: Arc<Queue<Box<dyn Task>>>,
        result_queue: Arc<Queue<TaskId>>,
        worker_table: Arc<WorkerTable>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let handles = (0..worker_count)
            .map(|slot_id| {
                let task_queue = task_queue.clone();
                let result_queue = result_queue.clone();
                let worker_table = worker_table.clone();
                let shutdown = shutdown.clone();
                thread::Builder::new()
                    .name(format!("cyclone-worker-{slot_id}"))
                    .spawn(move || worker_loop(slot_id, &task_queue, &result_queue, &worker_table, &shutdown))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { handles }
    }

    /// Joins every worker thread (spec §4.9 drain sequence).
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    slot_id: usize,
    task_queue: &Queue<Box<dyn Task>>,
    result_queue: &Queue<TaskId>,
    worker_table: &WorkerTable,
    shutdown: &ShutdownSignal,
) {
    worker_table.publish(slot_id, WorkerState::Ready, "", now_secs());

    loop {
        if shutdown.is_triggered() {
            break;
        }

        let task = match pop_or_shutdown(task_queue, shutdown) {
            Some(task) => task,
            None => break,
        };

        worker_table.publish(slot_id, WorkerState::Executing, task.tid(), now_secs());

        match catch_unwind(AssertUnwindSafe(|| task.execute())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(tid = task.tid(), error = %e, "task execution failed"),
            Err(_) => warn!(tid = task.tid(), "task execution panicked"),
        }

        if let Err(e) = result_queue.push(task.tid().to_string()) {
            warn!(tid = task.tid(), error = %e, "failed to publish task result, result queue full");
        }

        worker_table.publish(slot_id, WorkerState::Ready, "", now_secs());
    }

    debug!(slot_id, "worker exiting");
}

/// Polls the task queue in short steps so the worker can notice
/// `shutdown` without a true blocking pop (real threads have no per-thread
/// signal delivery the way `multiprocessing.Process` had).
fn pop_or_shutdown(task_queue: &Queue<Box<dyn Task>>, shutdown: &ShutdownSignal) -> Option<Box<dyn Task>> {
    loop {
        if shutdown.is_triggered() {
            return None;
        }
        match task_queue.try_pop(IDLE_POLL_INTERVAL) {
            Ok(Some(task)) => return Some(task),
            Ok(None) => continue,
            Err(Error::Timeout) => continue,
            Err(e) => {
                warn!(error = %e, "worker failed to poll task queue");
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingTask {
        tid: String,
        counter: Arc<AtomicUsize>,
    }

    impl Task for CountingTask {
        fn tid(&self) -> &str {
            &self.tid
        }
        fn encode_body(&self) -> String {
            String::new()
        }
        fn execute(&self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn pool_executes_tasks_and_publishes_results() {
        let task_queue: Arc<Queue<Box<dyn Task>>> = Arc::new(Queue::bounded(16));
        let result_queue = Arc::new(Queue::bounded(16));
        let worker_table = Arc::new(WorkerTable::new(2));
        let shutdown = ShutdownSignal::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let pool = WorkerPool::spawn(2, task_queue.clone(), result_queue.clone(), worker_table, shutdown.clone());

        for i in 0..5 {
            task_queue
                .push(Box::new(CountingTask {
                    tid: format!("T{i}"),
                    counter: counter.clone(),
                }))
                .unwrap();
        }

        let mut seen = 0;
        let deadline = std::time::Instant::now() + StdDuration::from_secs(5);
        while seen < 5 && std::time::Instant::now() < deadline {
            if result_queue.try_pop(StdDuration::from_millis(100)).unwrap().is_some() {
                seen += 1;
            }
        }
        assert_eq!(seen, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);

        shutdown.trigger();
        pool.join();
    }

    #[test]
    fn worker_state_transitions_through_executing() {
        let task_queue: Arc<Queue<Box<dyn Task>>> = Arc::new(Queue::bounded(16));
        let result_queue = Arc::new(Queue::bounded(16));
        let worker_table = Arc::new(WorkerTable::new(1));
        let shutdown = ShutdownSignal::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let pool = WorkerPool::spawn(1, task_queue.clone(), result_queue.clone(), worker_table.clone(), shutdown.clone());

        // wait for it to become ready
        let deadline = std::time::Instant::now() + StdDuration::from_secs(2);
        while worker_table.get(0).state == WorkerState::NotReady && std::time::Instant::now() < deadline {
            thread::sleep(StdDuration::from_millis(10));
        }
        assert_eq!(worker_table.get(0).state, WorkerState::Ready);

        task_queue
            .push(Box::new(CountingTask {
                tid: "T1".into(),
                counter,
            }))
            .unwrap();
        result_queue.try_pop(StdDuration::from_secs(2)).unwrap();

        shutdown.trigger();
        pool.join();
    }
}
