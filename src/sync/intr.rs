//! The interrupt-masked critical-section idiom: saving and restoring
//! the prior interrupt-enable flag so the idiom nests safely
//! substitutes for spinlocks on this uniprocessor kernel.
//!
//! [`crate::x86::IntrGuard`] holds the actual save/restore logic next to
//! the `cli`/`sti` instructions it wraps; this module is just the public
//! name every other subsystem calls through, so a future SMP rewrite
//! would only have to change one place.

use crate::x86::IntrGuard;

/// Disable interrupts, returning a guard that restores the prior
/// enable/disable state on drop. Nests correctly: masking inside an
/// already-masked section is a no-op restore on the inner guard's drop.
#[must_use]
pub(crate) fn push_cli() -> IntrGuard {
    IntrGuard::acquire()
}
