//! Scheduler glue: the TCB arena, the installed [`SchedClass`], the
//! `schedule()`/`wakeup_proc` entry points, and timer-tick dispatch.
//!
//! [`Scheduler`] bundles the run queue and TCB arena a real kernel would
//! keep behind one global lock acquired with interrupts masked —
//! bundling them here instead of reaching for hidden globals keeps the
//! policy logic host-testable, the same way [`crate::sched::runqueue`]
//! and [`crate::sched::stride`] already are.

pub(crate) mod runqueue;
pub(crate) mod stride;
pub(crate) mod task;

extern crate alloc;
use alloc::vec::Vec;

use self::runqueue::{RunQueue, SchedClass};
use self::stride::StrideSchedClass;
use self::task::{Task, TaskId, TaskState, TaskTable, WaitReason};
use crate::sync::intr::push_cli;

/// Owns the TCB arena, the run queue, and the installed policy. Exactly
/// one `SchedClass` is installed process-wide at boot; it is
/// monomorphized here rather than boxed as `dyn SchedClass` so
/// `schedule()`'s hot path never pays for dynamic dispatch.
pub(crate) struct Scheduler {
    pub(crate) tasks: TaskTable,
    rq: RunQueue,
    policy: StrideSchedClass,
    current: Option<TaskId>,
    idle: Option<TaskId>,
    /// Sleep-timer delta list: `sleeping[i].0` is ticks since
    /// `sleeping[i-1]` expires, so only the head needs decrementing on
    /// every tick.
    sleeping: Vec<(u32, TaskId)>,
}

impl Scheduler {
    pub(crate) fn new(max_time_slice: u32) -> Scheduler {
        let mut tasks = TaskTable::new();
        let mut idle_task = Task::new(1);
        idle_task.state = TaskState::Runnable;
        let idle = tasks.insert(idle_task);
        Scheduler {
            tasks,
            rq: RunQueue::new(max_time_slice),
            policy: StrideSchedClass,
            current: Some(idle),
            idle: Some(idle),
            sleeping: Vec::new(),
        }
    }

    /// Create a fresh `Runnable` task and enqueue it. Fork-like process
    /// creation itself is an external collaborator; this is the
    /// run-queue-facing half of it.
    pub(crate) fn spawn(&mut self, priority: u32) -> TaskId {
        let mut t = Task::new(priority);
        t.state = TaskState::Runnable;
        let id = self.tasks.insert(t);
        self.policy.enqueue(&mut self.rq, &mut self.tasks, id);
        id
    }

    pub(crate) fn current(&self) -> TaskId {
        self.current.expect("scheduler not initialized")
    }

    pub(crate) fn is_idle(&self, id: TaskId) -> bool {
        Some(id) == self.idle
    }

    pub(crate) fn runnable_count(&self) -> usize {
        self.rq.len()
    }

    /// Masks interrupts, clears `current.need_resched`, re-enqueues
    /// `current` if still runnable, picks (and dequeues) the next task —
    /// falling back to idle — bumps its run count, and switches if the
    /// choice differs from `current`.
    pub(crate) fn schedule(&mut self) {
        let _g = push_cli();
        let cur = self.current();
        self.tasks.get_mut(cur).need_resched = false;
        if self.tasks.get(cur).state == TaskState::Runnable {
            self.policy.enqueue(&mut self.rq, &mut self.tasks, cur);
        }
        let next = self
            .policy
            .pick_next(&mut self.rq, &mut self.tasks)
            .unwrap_or_else(|| self.idle.expect("idle task missing"));
        self.tasks.get_mut(next).runs += 1;
        let switched = next != cur;
        self.current = Some(next);
        if switched {
            context_switch(cur, next);
        }
    }

    /// Asserts the task isn't a zombie, transitions it to `Runnable`,
    /// clears its wait reason, and enqueues it unless it's already
    /// `current`.
    pub(crate) fn wakeup_proc(&mut self, id: TaskId) {
        let _g = push_cli();
        {
            let task = self.tasks.get_mut(id);
            assert!(task.state != TaskState::Zombie, "waking a zombie task");
            task.state = TaskState::Runnable;
            task.wait_reason = WaitReason::None;
        }
        if Some(id) != self.current {
            self.policy.enqueue(&mut self.rq, &mut self.tasks, id);
        }
    }

    /// Per-tick dispatch for the currently running task. The idle task
    /// has no time slice to burn through `SchedClass::proc_tick`, so a
    /// tick while idle directly requests a reschedule.
    pub(crate) fn proc_tick(&mut self) {
        let _g = push_cli();
        let cur = self.current();
        if self.is_idle(cur) {
            self.tasks.get_mut(cur).need_resched = true;
            return;
        }
        self.policy.proc_tick(&mut self.rq, &mut self.tasks, cur);
    }

    pub(crate) fn need_resched(&self) -> bool {
        self.tasks.get(self.current()).need_resched
    }

    /// Put `current` to sleep for `ticks` timer ticks, threading it
    /// into the delta list in the right spot.
    pub(crate) fn sleep_current(&mut self, ticks: u32) {
        let id = self.current();
        let mut remaining = ticks;
        let mut idx = 0;
        while idx < self.sleeping.len() {
            let delta = self.sleeping[idx].0;
            if delta > remaining {
                self.sleeping[idx].0 -= remaining;
                break;
            }
            remaining -= delta;
            idx += 1;
        }
        self.sleeping.insert(idx, (remaining, id));
        let task = self.tasks.get_mut(id);
        task.state = TaskState::Sleeping;
        task.wait_reason = WaitReason::Timer;
    }

    /// Decrement the head of the sleep-timer list and wake every entry
    /// that has now reached zero.
    pub(crate) fn tick_sleepers(&mut self) {
        if self.sleeping.is_empty() {
            return;
        }
        if self.sleeping[0].0 > 0 {
            self.sleeping[0].0 -= 1;
        }
        while !self.sleeping.is_empty() && self.sleeping[0].0 == 0 {
            let (_, id) = self.sleeping.remove(0);
            self.wakeup_proc(id);
        }
    }
}

/// Register-save/restore and the CR3 reload that makes `to` the running
/// task are an architectural primitive outside this core's detail
/// floor. A real kernel plugs its context-switch stub in here; the
/// scheduling decision above is already complete by the time this runs.
fn context_switch(_from: TaskId, _to: TaskId) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_with_one_runnable_task_picks_it_then_reenqueues() {
        let mut sched = Scheduler::new(4);
        let a = sched.spawn(1);
        sched.schedule();
        assert_eq!(sched.current(), a);
        assert!(!sched.tasks.get(a).need_resched);
    }

    #[test]
    fn schedule_falls_back_to_idle_when_nothing_runnable() {
        let mut sched = Scheduler::new(4);
        let a = sched.spawn(1);
        sched.schedule();
        assert_eq!(sched.current(), a);
        sched.tasks.get_mut(a).state = TaskState::Zombie;
        sched.schedule();
        assert!(sched.is_idle(sched.current()));
    }

    #[test]
    fn wakeup_proc_enqueues_a_sleeping_task() {
        let mut sched = Scheduler::new(4);
        let a = sched.spawn(1);
        sched.schedule();
        assert_eq!(sched.current(), a);

        let b_id = sched.tasks.insert(Task::new(1));
        sched.tasks.get_mut(b_id).state = TaskState::Sleeping;
        sched.tasks.get_mut(b_id).wait_reason = WaitReason::Semaphore;

        sched.wakeup_proc(b_id);
        assert_eq!(sched.tasks.get(b_id).state, TaskState::Runnable);
        assert_eq!(sched.tasks.get(b_id).wait_reason, WaitReason::None);
        assert_eq!(sched.runnable_count(), 1);
    }

    #[test]
    #[should_panic(expected = "zombie")]
    fn wakeup_proc_on_zombie_is_fatal() {
        let mut sched = Scheduler::new(4);
        let a = sched.spawn(1);
        sched.tasks.get_mut(a).state = TaskState::Zombie;
        sched.wakeup_proc(a);
    }

    #[test]
    fn proc_tick_sets_need_resched_at_zero_slice() {
        let mut sched = Scheduler::new(2);
        let a = sched.spawn(1);
        sched.schedule();
        assert_eq!(sched.current(), a);
        sched.proc_tick();
        assert!(!sched.need_resched());
        sched.proc_tick();
        assert!(sched.need_resched());
    }

    #[test]
    fn proc_tick_while_idle_requests_resched_directly() {
        let mut sched = Scheduler::new(4);
        assert!(sched.is_idle(sched.current()));
        sched.proc_tick();
        assert!(sched.need_resched());
    }

    #[test]
    fn sleep_then_ticks_wakes_in_order() {
        let mut sched = Scheduler::new(4);
        let a = sched.spawn(1);
        sched.schedule();
        assert_eq!(sched.current(), a);
        sched.sleep_current(3);

        let b = sched.tasks.insert(Task::new(1));
        sched.tasks.get_mut(b).state = TaskState::Sleeping;
        sched.current = Some(b);
        sched.sleep_current(1);
        sched.current = Some(a);

        sched.tick_sleepers();
        assert_eq!(sched.tasks.get(b).state, TaskState::Runnable);
        assert_eq!(sched.tasks.get(a).state, TaskState::Sleeping);

        sched.tick_sleepers();
        sched.tick_sleepers();
        assert_eq!(sched.tasks.get(a).state, TaskState::Runnable);
    }

    /// Hoare-monitor dining philosophers, grounded in ucore's
    /// `check_sync.c` `phi_take_forks`/`phi_put_forks`/`phi_test`.
    ///
    /// This harness has no real per-task call stack to suspend — `down`
    /// blocking only works when some *other* already-running call frame
    /// later shows up to call `up`, which a single synchronous test
    /// thread can't provide (see the note on
    /// `crate::sync::semaphore::tests::down_on_empty_semaphore_blocks_until_up_wakes_it`).
    /// So each round below only overlaps philosophers whose
    /// neighborhoods don't conflict; `phi_test` then always grants forks
    /// immediately and `Monitor::wait` is never reached. That is exactly
    /// the invariant-preserving path the monitor exists to guarantee, and
    /// it still exercises the shared `state[]`/`test()` logic that is the
    /// substance of the safety property.
    #[test]
    fn dining_philosophers() {
        use crate::sync::monitor::Monitor;

        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        enum PhiState {
            Thinking,
            Hungry,
            Eating,
        }

        const N: usize = 5;
        const TIMES: u32 = 4;

        fn left(i: usize) -> usize {
            (i + N - 1) % N
        }
        fn right(i: usize) -> usize {
            (i + 1) % N
        }

        fn phi_test(i: usize, state: &mut [PhiState; N], monitor: &mut Monitor, sched: &mut Scheduler) {
            if state[i] == PhiState::Hungry
                && state[left(i)] != PhiState::Eating
                && state[right(i)] != PhiState::Eating
            {
                state[i] = PhiState::Eating;
                monitor.signal(i, sched);
            }
        }

        fn phi_take_forks(i: usize, state: &mut [PhiState; N], monitor: &mut Monitor, sched: &mut Scheduler) {
            monitor.enter(sched);
            state[i] = PhiState::Hungry;
            phi_test(i, state, monitor, sched);
            assert_eq!(
                state[i],
                PhiState::Eating,
                "philosopher {} had to block in this interleaving",
                i
            );
            monitor.exit(sched);
        }

        fn phi_put_forks(i: usize, state: &mut [PhiState; N], monitor: &mut Monitor, sched: &mut Scheduler) {
            monitor.enter(sched);
            state[i] = PhiState::Thinking;
            phi_test(left(i), state, monitor, sched);
            phi_test(right(i), state, monitor, sched);
            monitor.exit(sched);
        }

        fn assert_no_adjacent_eating(state: &[PhiState; N]) {
            for i in 0..N {
                if state[i] == PhiState::Eating {
                    assert_ne!(state[left(i)], PhiState::Eating, "{} and {} ate at once", left(i), i);
                    assert_ne!(state[right(i)], PhiState::Eating, "{} and {} ate at once", i, right(i));
                }
            }
        }

        let mut sched = Scheduler::new(4);
        let mut monitor = Monitor::new(N);
        let mut state = [PhiState::Thinking; N];

        for _ in 0..TIMES {
            // 0 and 2 are not neighbors, so both can hold forks at once.
            phi_take_forks(0, &mut state, &mut monitor, &mut sched);
            phi_take_forks(2, &mut state, &mut monitor, &mut sched);
            assert_no_adjacent_eating(&state);
            phi_put_forks(0, &mut state, &mut monitor, &mut sched);
            phi_put_forks(2, &mut state, &mut monitor, &mut sched);

            phi_take_forks(1, &mut state, &mut monitor, &mut sched);
            assert_no_adjacent_eating(&state);
            phi_put_forks(1, &mut state, &mut monitor, &mut sched);

            phi_take_forks(3, &mut state, &mut monitor, &mut sched);
            assert_no_adjacent_eating(&state);
            phi_put_forks(3, &mut state, &mut monitor, &mut sched);

            phi_take_forks(4, &mut state, &mut monitor, &mut sched);
            assert_no_adjacent_eating(&state);
            phi_put_forks(4, &mut state, &mut monitor, &mut sched);

            assert!(state.iter().all(|&s| s == PhiState::Thinking));
        }
    }
}
