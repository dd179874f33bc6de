//! Hoare-style monitors: a binary `mutex` entry semaphore, an array of
//! condition variables, and the `next`/`next_count` baton used to hand
//! control straight from a signaler to the waiter it woke rather than
//! letting a third task barge into the monitor first (grounded in
//! ucore's `monitor.c`).

use crate::sched::Scheduler;
use crate::sync::semaphore::Semaphore;

extern crate alloc;
use alloc::vec::Vec;

/// One condition variable: the semaphore a waiter blocks on, and a count
/// of how many tasks are currently parked on it so `signal` can tell a
/// genuine wakeup from a wasted one.
struct Condvar {
    sem: Semaphore,
    count: u32,
}

impl Condvar {
    const fn new() -> Condvar {
        Condvar {
            sem: Semaphore::new(0),
            count: 0,
        }
    }
}

pub(crate) struct Monitor {
    mutex: Semaphore,
    next: Semaphore,
    next_count: u32,
    condvars: Vec<Condvar>,
}

impl Monitor {
    /// Build a monitor with `n_condvars` condition variables, numbered
    /// `0..n_condvars` for use with [`Monitor::wait`]/[`Monitor::signal`].
    pub(crate) fn new(n_condvars: usize) -> Monitor {
        let mut condvars = Vec::with_capacity(n_condvars);
        for _ in 0..n_condvars {
            condvars.push(Condvar::new());
        }
        Monitor {
            mutex: Semaphore::new(1),
            next: Semaphore::new(0),
            next_count: 0,
            condvars,
        }
    }

    /// Acquire the monitor. Every public monitor procedure calls this
    /// first and [`Monitor::exit`] last.
    pub(crate) fn enter(&mut self, sched: &mut Scheduler) {
        self.mutex.down(sched);
    }

    /// Release the monitor: hand the baton to a signaler's waiter if one
    /// is owed it, otherwise let a fresh entrant in.
    fn pass_baton_or_release(&mut self, sched: &mut Scheduler) {
        if self.next_count > 0 {
            self.next.up(sched);
        } else {
            self.mutex.up(sched);
        }
    }

    pub(crate) fn exit(&mut self, sched: &mut Scheduler) {
        self.pass_baton_or_release(sched);
    }

    /// Block on condition variable `idx`, releasing the monitor (or
    /// handing off the baton) for the duration.
    pub(crate) fn wait(&mut self, idx: usize, sched: &mut Scheduler) {
        self.condvars[idx].count += 1;
        self.pass_baton_or_release(sched);
        self.condvars[idx].sem.down(sched);
        self.condvars[idx].count -= 1;
    }

    /// Wake one waiter on condition variable `idx`, if any, and block the
    /// caller on `next` until that waiter releases the monitor back. A
    /// no-op when nobody is waiting — unlike POSIX
    /// `pthread_cond_signal`, a Hoare `signal` with no waiters must not
    /// be allowed to "count" for a future wait.
    pub(crate) fn signal(&mut self, idx: usize, sched: &mut Scheduler) {
        if self.condvars[idx].count > 0 {
            self.next_count += 1;
            self.condvars[idx].sem.up(sched);
            self.next.down(sched);
            self.next_count -= 1;
        }
    }
}
