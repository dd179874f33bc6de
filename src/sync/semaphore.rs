//! Counting semaphore, FIFO over its wait queue: `up` always wakes the
//! earliest enqueued waiter first.

use crate::sched::task::WaitReason;
use crate::sched::Scheduler;
use crate::sync::intr::push_cli;
use crate::sync::waitqueue::WaitQueue;

pub(crate) struct Semaphore {
    value: i32,
    waiters: WaitQueue,
}

impl Semaphore {
    pub(crate) const fn new(value: i32) -> Semaphore {
        Semaphore {
            value,
            waiters: WaitQueue::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn value(&self) -> i32 {
        self.value
    }

    /// Increment if nobody is waiting, else wake the earliest waiter
    /// instead of bumping `value` (the waiter's `down` takes the slot
    /// directly, so the count is conserved either way).
    pub(crate) fn up(&mut self, sched: &mut Scheduler) {
        let _g = push_cli();
        if self.waiters.is_empty() {
            self.value += 1;
        } else {
            self.waiters.wakeup_first(sched, WaitReason::Semaphore);
        }
    }

    /// Decrement and return immediately if positive; otherwise block
    /// until woken. Returns the wakeup reason if it differs from
    /// [`WaitReason::Semaphore`] (e.g. [`WaitReason::Interrupted`]) —
    /// callers decide whether to retry or propagate.
    pub(crate) fn down(&mut self, sched: &mut Scheduler) -> WaitReason {
        {
            let _g = push_cli();
            if self.value > 0 {
                self.value -= 1;
                return WaitReason::None;
            }
            self.waiters.wait_current(sched, WaitReason::Semaphore);
        }
        sched.schedule();
        let id = sched.current();
        let wakeup = sched.tasks.get(id).wakeup_flags;
        self.waiters.remove(sched, id);
        if wakeup == WaitReason::Semaphore {
            WaitReason::None
        } else {
            wakeup
        }
    }
}
