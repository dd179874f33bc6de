//! Stride scheduling: the default [`crate::sched::runqueue::SchedClass`].
//! Each runnable task carries an unsigned `stride` counter; the
//! scheduler always picks the minimum, then advances that task's stride
//! by `BigStride / priority` so that over many picks a task with twice
//! the priority runs roughly twice as often.

use core::cmp::Ordering;

use super::runqueue::{RunQueue, SchedClass};
use super::task::{TaskId, TaskState, TaskTable};

/// `0x7FFFFFFF`, chosen (as in the original `ucore` lab) to be half of
/// `u32::MAX` so that `BigStride / priority` never overflows for any
/// `priority >= 1` and so comparisons tolerate one wrap of the counter.
pub(crate) const BIG_STRIDE: u32 = 0x7FFF_FFFF;

/// A `u32` stride value compared via wrapping signed subtraction rather
/// than raw magnitude, so that a counter which has wrapped past
/// `u32::MAX` still orders correctly against counters within half the
/// range of it. This is only a *local* total order — valid as long as
/// every pair of strides actually being compared is within `i32::MAX`
/// of each other, which holds as long as no task is starved for longer
/// than that many picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stride(pub(crate) u32);

impl PartialOrd for Stride {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stride {
    fn cmp(&self, other: &Self) -> Ordering {
        let diff = self.0.wrapping_sub(other.0) as i32;
        diff.cmp(&0)
    }
}

/// The per-pick stride increment for a task of the given `priority`.
/// Priority zero is treated as the slowest-possible non-zero priority.
pub(crate) fn step(priority: u32) -> u32 {
    if priority == 0 {
        BIG_STRIDE
    } else {
        BIG_STRIDE / priority
    }
}

/// The default, and only installed, scheduling policy: exactly one
/// class is installed process-wide at boot. Kept as a concrete,
/// zero-sized type rather than a `dyn SchedClass` so the hot
/// `pick_next`/`enqueue` path monomorphizes.
pub(crate) struct StrideSchedClass;

impl SchedClass for StrideSchedClass {
    fn init(&self, _rq: &mut RunQueue) {}

    fn enqueue(&self, rq: &mut RunQueue, tasks: &mut TaskTable, id: TaskId) {
        let task = tasks.get_mut(id);
        if task.time_slice == 0 || task.time_slice > rq.max_time_slice {
            task.time_slice = rq.max_time_slice;
        }
        let stride = task.stride;
        rq.push(Stride(stride), id);
    }

    fn dequeue(&self, rq: &mut RunQueue, _tasks: &mut TaskTable, id: TaskId) {
        rq.remove(id);
    }

    fn pick_next(&self, rq: &mut RunQueue, tasks: &mut TaskTable) -> Option<TaskId> {
        let id = rq.pop_min()?;
        let task = tasks.get_mut(id);
        task.stride = task.stride.wrapping_add(step(task.priority));
        Some(id)
    }

    fn proc_tick(&self, _rq: &mut RunQueue, tasks: &mut TaskTable, id: TaskId) {
        let task = tasks.get_mut(id);
        if task.time_slice > 0 {
            task.time_slice -= 1;
        }
        if task.time_slice == 0 {
            task.need_resched = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::task::Task;

    #[test]
    fn stride_orders_by_wrapped_difference() {
        let near_wrap = Stride(u32::MAX - 2);
        let wrapped = Stride(5);
        assert!(near_wrap < wrapped);
        assert!(wrapped > near_wrap);
    }

    #[test]
    fn equal_strides_compare_equal() {
        assert_eq!(Stride(42).cmp(&Stride(42)), Ordering::Equal);
    }

    #[test]
    fn step_uses_big_stride_for_zero_priority() {
        assert_eq!(step(0), BIG_STRIDE);
        assert_eq!(step(1), BIG_STRIDE);
        assert_eq!(step(2), BIG_STRIDE / 2);
    }

    #[test]
    fn pick_next_prefers_minimum_then_advances_stride() {
        let mut tasks = TaskTable::new();
        let mut rq = RunQueue::new(8);
        let policy = StrideSchedClass;

        let mut t1 = Task::new(1);
        t1.state = TaskState::Runnable;
        let id1 = tasks.insert(t1);
        let mut t2 = Task::new(1);
        t2.state = TaskState::Runnable;
        t2.stride = 10;
        let id2 = tasks.insert(t2);

        policy.enqueue(&mut rq, &mut tasks, id1);
        policy.enqueue(&mut rq, &mut tasks, id2);

        let picked = policy.pick_next(&mut rq, &mut tasks).unwrap();
        assert_eq!(picked, id1);
        assert!(tasks.get(id1).stride > 0);
    }

    /// Five equal-priority tasks each yielding once per pick, over 100
    /// ticks, should each run roughly 20 times.
    #[test]
    fn equal_priority_fairness_over_many_ticks() {
        let mut tasks = TaskTable::new();
        let mut rq = RunQueue::new(8);
        let policy = StrideSchedClass;
        let mut ids = alloc::vec::Vec::new();
        for _ in 0..5 {
            let mut t = Task::new(1);
            t.state = TaskState::Runnable;
            let id = tasks.insert(t);
            policy.enqueue(&mut rq, &mut tasks, id);
            ids.push(id);
        }

        let mut runs = alloc::vec![0u32; ids.len()];
        for _ in 0..100 {
            let picked = policy.pick_next(&mut rq, &mut tasks).unwrap();
            let idx = ids.iter().position(|&i| i == picked).unwrap();
            runs[idx] += 1;
            policy.enqueue(&mut rq, &mut tasks, picked);
        }

        for r in runs {
            assert!((18..=22).contains(&r), "run count {} out of range", r);
        }
    }

    /// priorities {1,2,2,2,2}: the first task should run roughly half
    /// as often as each of the others.
    #[test]
    fn skewed_priority_fairness() {
        let mut tasks = TaskTable::new();
        let mut rq = RunQueue::new(8);
        let policy = StrideSchedClass;
        let priorities = [1u32, 2, 2, 2, 2];
        let mut ids = alloc::vec::Vec::new();
        for &p in &priorities {
            let mut t = Task::new(p);
            t.state = TaskState::Runnable;
            let id = tasks.insert(t);
            policy.enqueue(&mut rq, &mut tasks, id);
            ids.push(id);
        }

        let mut runs = alloc::vec![0u32; ids.len()];
        for _ in 0..500 {
            let picked = policy.pick_next(&mut rq, &mut tasks).unwrap();
            let idx = ids.iter().position(|&i| i == picked).unwrap();
            runs[idx] += 1;
            policy.enqueue(&mut rq, &mut tasks, picked);
        }

        let avg_others = (runs[1] + runs[2] + runs[3] + runs[4]) as f64 / 4.0;
        let ratio = runs[0] as f64 / avg_others;
        assert!((0.45..=0.55).contains(&ratio), "ratio {} out of range", ratio);
    }
}
