//! The page-fault handler: classifies a fault against the faulting
//! VMA's permissions, then either installs a fresh frame or swaps one
//! in. This is the bridge between address-space/VMA bookkeeping and the
//! swap subsystem.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{PteFlags, VmaFlags};
use crate::mm::frame::FrameTable;
use crate::mm::page_table::VirtAddr;
use crate::mm::swap::{self, SlotAllocator, SwapDevice, SwapPolicy};
use crate::mm::vma::{frame_id_of, AddressSpace};

/// Bumped on every [`do_pgfault`] call, for tests that want to assert a
/// fault actually happened.
static FAULT_COUNT: AtomicU32 = AtomicU32::new(0);

pub(crate) fn fault_count() -> u32 {
    FAULT_COUNT.load(Ordering::Relaxed)
}

/// The hardware error code's three bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FaultErrorCode {
    pub(crate) present: bool,
    pub(crate) write: bool,
    #[allow(dead_code)]
    pub(crate) user: bool,
}

/// Why [`do_pgfault`] failed. The trap dispatcher maps any of these to
/// "nonzero return ⇒ escalate to kill-process".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultError {
    /// No VMA covers the faulting address.
    NoVma,
    /// The VMA's flags don't permit the access that was attempted.
    PermissionDenied,
    /// Write to an already-present PTE: fatal pending copy-on-write.
    NonWritablePte,
    OutOfMemory,
}

/// Classify and repair a page fault. `is_current` is passed straight
/// through to [`crate::mm::page_table::PageDirectory::map`] so the TLB
/// is only invalidated when `mm` is the address space actually loaded
/// in `cr3`.
pub(crate) fn do_pgfault(
    mm: &mut AddressSpace,
    frames: &mut FrameTable,
    slots: &mut SlotAllocator,
    device: &mut impl SwapDevice,
    policy: &impl SwapPolicy,
    err: FaultErrorCode,
    fault_addr: VirtAddr,
    is_current: bool,
) -> Result<(), FaultError> {
    FAULT_COUNT.fetch_add(1, Ordering::Relaxed);

    let vma = mm.find_vma(fault_addr).ok_or(FaultError::NoVma)?;

    match (err.write, err.present) {
        (true, false) => {
            if !vma.flags.contains(VmaFlags::WRITE) {
                return Err(FaultError::PermissionDenied);
            }
        }
        (false, false) => {
            if !(vma.flags.contains(VmaFlags::READ) || vma.flags.contains(VmaFlags::EXEC)) {
                return Err(FaultError::PermissionDenied);
            }
        }
        (false, true) => return Err(FaultError::PermissionDenied),
        // Write to a present PTE: currently fatal pending copy-on-write.
        (true, true) => return Err(FaultError::NonWritablePte),
    }

    let va = fault_addr.round_down();
    let mut perm = PteFlags::USER;
    if vma.flags.contains(VmaFlags::WRITE) {
        perm |= PteFlags::WRITABLE;
    }

    let raw = mm.pgdir.get_pte_raw(va, frames);
    let pa = if raw == 0 {
        frames.alloc_zeroed().ok_or(FaultError::OutOfMemory)?
    } else if swap::is_swap_entry(raw) {
        swap::swap_in(raw, frames, slots, device)
    } else {
        // Present: the classification above already rejected every path
        // that could reach here with P=1, so this would be a kernel bug.
        unreachable!("do_pgfault reached a present PTE after classification");
    };

    mm.pgdir.map(va, pa, perm, frames, is_current);
    policy.map_swappable(mm, frames, frame_id_of(pa), va, false);
    Ok(())
}
