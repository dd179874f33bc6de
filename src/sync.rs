//! Blocking primitives built over the scheduler: interrupt-masked
//! critical sections, wait queues, counting semaphores, and Hoare-style
//! monitors with condition variables.
//!
//! Every mutating section in here runs under [`intr::push_cli`]; the
//! only suspension point is the `schedule()` call inside
//! [`semaphore::Semaphore::down`], which hands control back to the
//! scheduler with interrupts restored by the context switch itself.

pub(crate) mod intr;
pub(crate) mod monitor;
pub(crate) mod semaphore;
pub(crate) mod waitqueue;
