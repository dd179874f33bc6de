//! Wait queues: an ordered list of blocked tasks, append-at-tail /
//! detach-from-head, field-for-field from ucore's `wait.c`.

use crate::list::IntrusiveList;
use crate::sched::task::{TaskId, TaskState, WaitQueueView, WaitReason};
use crate::sched::Scheduler;
use crate::sync::intr::push_cli;

/// An ordered queue of sleeping tasks, threaded through each
/// [`crate::sched::task::Task::wq_link`] slot. Holds no tasks of its
/// own — a `Semaphore` or `Monitor` embeds one per thing threads can
/// block on.
pub(crate) struct WaitQueue {
    list: IntrusiveList<TaskId>,
}

impl WaitQueue {
    pub(crate) const fn new() -> WaitQueue {
        WaitQueue {
            list: IntrusiveList::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Link `current` onto the tail of this queue, mark it `Sleeping`
    /// with `reason`, and reset its wakeup stamp to the `Interrupted`
    /// default. Does not itself yield the CPU — call
    /// [`Scheduler::schedule`] next.
    pub(crate) fn wait_current(&mut self, sched: &mut Scheduler, reason: WaitReason) {
        let _g = push_cli();
        let id = sched.current();
        {
            let task = sched.tasks.get_mut(id);
            task.state = TaskState::Sleeping;
            task.wait_reason = reason;
            task.wakeup_flags = WaitReason::Interrupted;
        }
        let mut view = WaitQueueView(&mut sched.tasks);
        self.list.push_back(&mut view, id);
    }

    /// Detach the head waiter, stamp its wakeup reason, and wake it. A
    /// no-op on an empty queue.
    pub(crate) fn wakeup_first(&mut self, sched: &mut Scheduler, reason: WaitReason) {
        let _g = push_cli();
        let head = {
            let mut view = WaitQueueView(&mut sched.tasks);
            self.list.pop_front(&mut view)
        };
        if let Some(id) = head {
            sched.tasks.get_mut(id).wakeup_flags = reason;
            sched.wakeup_proc(id);
        }
    }

    /// Unlink `id` without waking it. Used by a resumed waiter to
    /// detach its own node once it is already running again.
    pub(crate) fn remove(&mut self, sched: &mut Scheduler, id: TaskId) {
        let _g = push_cli();
        let mut view = WaitQueueView(&mut sched.tasks);
        self.list.remove(&mut view, id);
    }
}
