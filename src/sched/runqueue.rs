//! The run queue and the scheduling-policy seam.
//!
//! `RunQueue` owns nothing but the ordering structure and the knobs a
//! policy needs (`max_time_slice`); the policy itself is a [`SchedClass`]
//! implementation, installed once at boot. Only
//! [`crate::sched::stride::StrideSchedClass`] exists today, but the
//! `enqueue`/`dequeue`/`pick_next`/`proc_tick` seam is kept so a second
//! policy could be dropped in without touching `TaskTable` or the
//! scheduling loop in [`super::mod`].

extern crate alloc;

use super::stride::Stride;
use super::task::{TaskId, TaskTable};
use crate::skew_heap::SkewHeap;

/// Policy-neutral queue of runnable tasks. The ordering key type
/// (`Stride`) is the one piece that is policy-specific; everything else
/// here — the time-slice cap, the population count — is shared across
/// any policy that might replace `StrideSchedClass`.
pub(crate) struct RunQueue {
    pub(crate) max_time_slice: u32,
    heap: SkewHeap<Stride, TaskId>,
    count: usize,
}

impl RunQueue {
    pub(crate) const fn new(max_time_slice: u32) -> RunQueue {
        RunQueue {
            max_time_slice,
            heap: SkewHeap::new(),
            count: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn push(&mut self, key: Stride, id: TaskId) {
        self.heap.push(key, id);
        self.count += 1;
    }

    pub(crate) fn pop_min(&mut self) -> Option<TaskId> {
        let (_, id) = self.heap.pop_min()?;
        self.count -= 1;
        Some(id)
    }

    /// Remove `id` from the queue regardless of its position. A skew
    /// heap has no cheap arbitrary-key delete, so this drains the heap,
    /// drops the matching entry, and reinserts the rest — O(n log n),
    /// acceptable since `dequeue` is only called off the rare paths
    /// (blocking, exit), never from `pick_next`.
    pub(crate) fn remove(&mut self, id: TaskId) {
        let mut kept = alloc::vec::Vec::with_capacity(self.count);
        while let Some((key, value)) = self.heap.pop_min() {
            if value != id {
                kept.push((key, value));
            }
        }
        self.count = kept.len();
        for (key, value) in kept {
            self.heap.push(key, value);
        }
    }
}

/// A pluggable scheduling policy. Implementations drive a [`RunQueue`]
/// and the `rq_link`/stride/time-slice bookkeeping inside each [`Task`];
/// the rest of the kernel only ever calls through this trait, never
/// touches the heap directly.
///
/// [`Task`]: super::task::Task
pub(crate) trait SchedClass {
    /// Run once at boot, before any task is enqueued.
    fn init(&self, rq: &mut RunQueue);

    fn enqueue(&self, rq: &mut RunQueue, tasks: &mut TaskTable, id: TaskId);

    /// Remove `id` from the queue without running it. Used when a task
    /// blocks or exits while still queued.
    fn dequeue(&self, rq: &mut RunQueue, tasks: &mut TaskTable, id: TaskId);

    /// Select, and remove, the next task to run.
    fn pick_next(&self, rq: &mut RunQueue, tasks: &mut TaskTable) -> Option<TaskId>;

    /// Called once per timer tick for the currently running task.
    fn proc_tick(&self, rq: &mut RunQueue, tasks: &mut TaskTable, id: TaskId);
}
