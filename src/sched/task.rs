//! The task control block and its arena.
//!
//! TCBs are created by fork-like primitives that live outside this core
//! and destroyed by reapers once `Zombie` with no holders; what this
//! module owns is the TCB layout itself, the arena that hands out
//! stable [`TaskId`]s, and the intrusive link slot a task carries for
//! wait-queue membership. Run-queue membership needs no such slot: the
//! default policy orders runnable tasks in a skew heap keyed by stride,
//! not an intrusive list, so only a `Sleeping` task is ever linked
//! through [`WaitQueueView`].

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::list::{Link, LinkStore};
use crate::mm::vma::AddressSpace;
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TaskId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Uninit,
    Sleeping,
    Runnable,
    Zombie,
}

/// Why a task is (or was) blocked. `Interrupted` is the default stamp a
/// [`crate::sync::waitqueue::WaitQueue`] applies if nothing more specific
/// is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitReason {
    None,
    Interrupted,
    Semaphore,
    Condvar,
    Timer,
}

pub(crate) struct Task {
    pub(crate) state: TaskState,
    pub(crate) wait_reason: WaitReason,
    /// Stamped at wakeup time, independent of `wait_reason`. `down()`
    /// compares this against the reason it went to sleep for to detect
    /// a spurious/interrupted wakeup.
    pub(crate) wakeup_flags: WaitReason,
    pub(crate) priority: u32,
    pub(crate) stride: u32,
    pub(crate) time_slice: u32,
    pub(crate) need_resched: bool,
    pub(crate) runs: u32,
    pub(crate) mm: Option<Arc<Mutex<AddressSpace>>>,
    pub(crate) wq_link: Link<TaskId>,
}

impl Task {
    pub(crate) fn new(priority: u32) -> Task {
        Task {
            state: TaskState::Uninit,
            wait_reason: WaitReason::None,
            wakeup_flags: WaitReason::Interrupted,
            priority: priority.max(1),
            stride: 0,
            time_slice: 0,
            need_resched: false,
            runs: 0,
            mm: None,
            wq_link: Link::empty(),
        }
    }
}

/// Growable arena of TCBs. Slots are never physically removed, only
/// marked `Zombie` then reused, so that a stale [`TaskId`] held by a
/// wait node never aliases an unrelated task (the slot is simply
/// re-initialized and the id rebound to its generation, mirroring how
/// the frame table never shrinks either).
pub(crate) struct TaskTable {
    tasks: Vec<Option<Task>>,
}

impl TaskTable {
    pub(crate) const fn new() -> TaskTable {
        TaskTable { tasks: Vec::new() }
    }

    pub(crate) fn insert(&mut self, task: Task) -> TaskId {
        for (i, slot) in self.tasks.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(task);
                return TaskId(i as u32);
            }
        }
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(Some(task));
        id
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.get_mut(id.0 as usize).and_then(Option::take)
    }

    pub(crate) fn get(&self, id: TaskId) -> &Task {
        self.tasks[id.0 as usize]
            .as_ref()
            .expect("TaskId refers to an empty slot")
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> &mut Task {
        self.tasks[id.0 as usize]
            .as_mut()
            .expect("TaskId refers to an empty slot")
    }
}

/// A [`LinkStore`] view onto [`TaskTable`] that threads the wait-queue
/// link field.
pub(crate) struct WaitQueueView<'a>(pub(crate) &'a mut TaskTable);

impl<'a> LinkStore<TaskId> for WaitQueueView<'a> {
    fn link(&mut self, key: TaskId) -> &mut Link<TaskId> {
        &mut self.0.get_mut(key).wq_link
    }
}
