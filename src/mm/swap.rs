//! Swap subsystem: a slot allocator over a backing device, a pluggable
//! eviction policy, and the `swap_out`/`swap_in` primitives the
//! page-fault handler calls through.
//!
//! The swap entry encoding (`{slot:24, reserved:7, P=0}` packed into a
//! 32-bit PTE word) and the default FIFO-over-a-circular-list policy are
//! grounded in ucore's `vmm.c`/`swap_fifo.c`.

extern crate alloc;
use alloc::vec::Vec;

use crate::constants::PGSIZE;
use crate::list::IntrusiveList;
use crate::mm::frame::{FrameId, FrameTable};
use crate::mm::page_table::VirtAddr;
use crate::mm::vma::AddressSpace;

/// Pack a swap slot number into a swap-entry PTE word: `P=0` (bit 0
/// clear) with the slot number in bits `8..32`.
pub(crate) fn pack_swap_entry(slot: u32) -> u32 {
    slot << 8
}

/// Inverse of [`pack_swap_entry`].
pub(crate) fn unpack_swap_slot(raw: u32) -> u32 {
    raw >> 8
}

/// `true` for a nonzero word with `P=0` — a swap entry rather than "no
/// mapping".
pub(crate) fn is_swap_entry(raw: u32) -> bool {
    raw != 0 && raw & 0x1 == 0
}

/// A byte-addressable backing store exposing page-sized slots numbered
/// `1..MaxSlot`; slot 0 is the "no slot" sentinel. The live kernel backs
/// this with the IDE driver (an external collaborator); tests back it
/// with a `Vec<u8>`.
pub(crate) trait SwapDevice {
    fn read_slot(&mut self, slot: u32, buf: &mut [u8; PGSIZE as usize]);
    fn write_slot(&mut self, slot: u32, buf: &[u8; PGSIZE as usize]);
}

/// Free-set over swap slots `1..=max_slot`. Reconstructed from PTE scans
/// at boot in the real kernel, not persisted; tests build one fresh.
pub(crate) struct SlotAllocator {
    free: Vec<bool>,
}

impl SlotAllocator {
    pub(crate) fn new(max_slot: u32) -> SlotAllocator {
        let mut free = alloc::vec![true; max_slot as usize + 1];
        free[0] = false;
        SlotAllocator { free }
    }

    pub(crate) fn alloc(&mut self) -> Option<u32> {
        let slot = self.free.iter().position(|&f| f)?;
        self.free[slot] = false;
        Some(slot as u32)
    }

    pub(crate) fn free_slot(&mut self, slot: u32) {
        assert!(slot != 0, "freeing the sentinel slot 0");
        assert!(!self.free[slot as usize], "double-free of swap slot {slot}");
        self.free[slot as usize] = true;
    }

    pub(crate) fn nr_free(&self) -> usize {
        self.free.iter().filter(|&&f| f).count()
    }
}

/// Per-address-space eviction-policy state: a circular list of swappable
/// frames, threaded through each [`crate::mm::frame::Frame`]'s own
/// `swap_link` slot via [`crate::mm::frame::FrameTable::swap_list_view`].
/// A frame is swappable for at most one address space at a time — this
/// teaching kernel's VMAs are never shared (`dup_from` copies eagerly),
/// so that always holds.
pub(crate) struct PolicyState {
    list: IntrusiveList<FrameId>,
}

impl PolicyState {
    pub(crate) const fn new() -> PolicyState {
        PolicyState {
            list: IntrusiveList::new(),
        }
    }
}

/// The capability set a frame-eviction policy implements. The default is
/// [`FifoSwapPolicy`]; a clock policy that actually reads the
/// accessed/dirty shadow bits in `Frame` would override
/// `swap_out_victim` and `tick_event` without touching anything else.
pub(crate) trait SwapPolicy {
    fn init(&self) {}

    fn init_mm(&self, mm: &mut AddressSpace) {
        mm.swap_slot = Some(PolicyState::new());
    }

    fn map_swappable(&self, mm: &mut AddressSpace, frames: &mut FrameTable, frame: FrameId, va: VirtAddr, _in_tick: bool) {
        frames.set_pra_vaddr(frame, Some(va));
        let state = mm.swap_slot.as_mut().expect("map_swappable before init_mm");
        let mut view = frames.swap_list_view();
        state.list.push_back(&mut view, frame);
    }

    fn set_unswappable(&self, mm: &mut AddressSpace, frames: &mut FrameTable, frame: FrameId) {
        if let Some(state) = mm.swap_slot.as_mut() {
            let mut view = frames.swap_list_view();
            state.list.remove(&mut view, frame);
        }
    }

    fn swap_out_victim(&self, mm: &mut AddressSpace, frames: &mut FrameTable) -> Option<FrameId> {
        let state = mm.swap_slot.as_mut()?;
        let mut view = frames.swap_list_view();
        state.list.pop_front(&mut view)
    }

    fn tick_event(&self, _mm: &mut AddressSpace) {}
}

/// FIFO: the oldest-mapped swappable frame is always the next victim.
/// This teaching core implements the plain-FIFO half of the classic
/// enhanced-clock scheme and leaves the accessed-bit second chance as
/// the documented extension point.
pub(crate) struct FifoSwapPolicy;

impl SwapPolicy for FifoSwapPolicy {}

/// Evict up to `n` frames from `mm`, writing each to a freshly allocated
/// swap slot and replacing its PTE with a swap entry. Returns the number
/// actually evicted — fewer than `n` iff the policy ran out of
/// swappable frames first.
pub(crate) fn swap_out(
    mm: &mut AddressSpace,
    frames: &mut FrameTable,
    slots: &mut SlotAllocator,
    device: &mut impl SwapDevice,
    policy: &impl SwapPolicy,
    n: usize,
    in_tick: bool,
) -> usize {
    let mut done = 0;
    for _ in 0..n {
        let Some(victim) = policy.swap_out_victim(mm, frames) else {
            break;
        };
        let va = frames
            .pra_vaddr(victim)
            .expect("swappable frame has no recorded virtual address");
        let slot = slots.alloc().expect("swap device exhausted");
        let pa = frames.phys_addr_of(victim);

        let mut buf = [0u8; PGSIZE as usize];
        let src = frames.as_mut_ptr(pa);
        unsafe {
            core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), PGSIZE as usize);
        }
        device.write_slot(slot, &buf);

        mm.pgdir.set_swap_entry(va, pack_swap_entry(slot), frames, false);
        frames.decref(pa);
        let _ = in_tick;
        done += 1;
    }
    done
}

/// Read the page backing `raw_pte`'s swap slot into a freshly allocated
/// frame, freeing the slot. The caller installs the returned frame's PTE
/// and hands it back to the policy.
pub(crate) fn swap_in(
    raw_pte: u32,
    frames: &mut FrameTable,
    slots: &mut SlotAllocator,
    device: &mut impl SwapDevice,
) -> crate::mm::page_table::PhysAddr {
    use crate::mm::page_table::FrameOwner;

    let slot = unpack_swap_slot(raw_pte);
    let pa = frames.alloc_zeroed().expect("swap_in: out of frames");
    let mut buf = [0u8; PGSIZE as usize];
    device.read_slot(slot, &mut buf);
    let dst = frames.as_mut_ptr(pa);
    unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), dst, PGSIZE as usize);
    }
    slots.free_slot(slot);
    pa
}
