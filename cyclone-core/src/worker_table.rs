//! Worker-state table (spec §3/§9): one slot per configured worker, guarded
//! by a single table-wide lock. The original keeps this in POSIX shared
//! memory (`multiprocessing.RawArray`) because workers are separate
//! processes; here the worker pool lives in-process as supervised threads
//! (see DESIGN.md), so an ordinary `Arc`-shared, lock-guarded `Vec` gives the
//! same "one lock, small fixed-width fields" shape spec §9 asks for.

use parking_lot::{Mutex, MutexGuard};

/// A worker's lifecycle state (spec §4.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    NotReady,
    Ready,
    Executing,
}

/// One worker's published state: `{state, tid, timestamp}` (spec §3)
#[derive(Debug, Clone, Default)]
pub struct WorkerSlot {
    pub state: WorkerState,
    pub tid: String,
    pub timestamp: u64,
}

/// The process-wide worker-state table: one slot per worker, one lock for
/// the whole table.
pub struct WorkerTable {
    slots: Mutex<Vec<WorkerSlot>>,
}

impl WorkerTable {
    /// Creates a table with `worker_count` slots, all `NotReady`.
    pub fn new(worker_count: usize) -> Self {
        Self {
            slots: Mutex::new(vec![WorkerSlot::default(); worker_count]),
        }
    }

    /// Publishes a full `(state, tid, timestamp)` transition for `slot_id`
    /// under the table lock (spec §5: "published under the state-table lock
    /// before the next operation").
    pub fn publish(&self, slot_id: usize, state: WorkerState, tid: &str, timestamp: u64) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[slot_id];
        slot.state = state;
        slot.tid = tid.to_string();
        slot.timestamp = timestamp;
    }

    /// Reads a consistent snapshot of one slot.
    pub fn get(&self, slot_id: usize) -> WorkerSlot {
        self.slots.lock()[slot_id].clone()
    }

    /// Reads a consistent snapshot of every slot.
    pub fn snapshot(&self) -> Vec<WorkerSlot> {
        self.slots.lock().clone()
    }

    /// Exposes the table-wide lock for callers that need to read/write
    /// several slots as one critical section.
    pub fn lock(&self) -> MutexGuard<'_, Vec<WorkerSlot>> {
        self.slots.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_starts_not_ready() {
        let table = WorkerTable::new(3);
        for slot in table.snapshot() {
            assert_eq!(slot.state, WorkerState::NotReady);
            assert!(slot.tid.is_empty());
        }
    }

    #[test]
    fn publish_is_visible_immediately() {
        let table = WorkerTable::new(2);
        table.publish(0, WorkerState::Executing, "T1", 123);
        let slot = table.get(0);
        assert_eq!(slot.state, WorkerState::Executing);
        assert_eq!(slot.tid, "T1");
        assert_eq!(slot.timestamp, 123);
        // other slots untouched
        assert_eq!(table.get(1).state, WorkerState::NotReady);
    }
}
