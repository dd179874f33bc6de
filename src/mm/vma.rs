//! Virtual memory areas and the address-space object that owns them.
//!
//! VMA ordering and the overlap assertion are grounded in ucore's
//! `vmm.c:check_vma_struct`/`insert_vma_struct`.

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::constants::{PGSIZE, ULIM, VmaFlags};
use crate::mm::frame::FrameId;
use crate::mm::page_table::{FrameOwner, PageDirectory, PhysAddr, VirtAddr};
use spin::Mutex;

/// A contiguous, page-aligned, half-open user-address range with
/// uniform permissions.
#[derive(Clone, Copy)]
pub(crate) struct Vma {
    pub(crate) start: VirtAddr,
    pub(crate) end: VirtAddr,
    pub(crate) flags: VmaFlags,
}

impl Vma {
    pub(crate) fn contains(&self, va: VirtAddr) -> bool {
        va >= self.start && va < self.end
    }

    fn overlaps(&self, other: &Vma) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The memory identity of a task: a page directory plus an ordered,
/// non-overlapping VMA list.
///
/// The holder count and per-address-space lock are realized one level
/// up: callers share an `AddressSpace` behind `Arc<Mutex<AddressSpace>>`
/// (see `sched::task::Task::mm`), so the "holders" count is simply
/// `Arc::strong_count` and the lock is the `Mutex` itself.
pub(crate) struct AddressSpace {
    pub(crate) pgdir: PageDirectory,
    vmas: Vec<Vma>,
    mru: Option<usize>,
    /// Opaque slot used by the swap eviction policy; holds the
    /// per-address-space circular scan state of the default FIFO/clock
    /// policy once one is installed (see [`crate::mm::swap`]).
    pub(crate) swap_slot: Option<crate::mm::swap::PolicyState>,
}

impl AddressSpace {
    /// Fresh page directory sharing the kernel half with the boot
    /// directory, with its own self-map slot installed; empty VMA list.
    ///
    /// `PageDirectory::new` already starts with the kernel half absent;
    /// `copy_kernel_half` installs the shared high-half PDEs from
    /// `kernel_pgdir`. `frames` supplies the frame backing the
    /// directory's own self-map entry, increffed here and freed in
    /// [`AddressSpace::teardown`].
    pub(crate) fn create(kernel_pgdir: &PageDirectory, frames: &mut impl FrameOwner) -> AddressSpace {
        let mut pgdir = PageDirectory::new();
        pgdir.copy_kernel_half(kernel_pgdir);
        let self_pa = frames.alloc_zeroed().expect("out of frames for page directory self-map");
        frames.incref(self_pa);
        pgdir.install_self_map(self_pa);
        AddressSpace {
            pgdir,
            vmas: Vec::new(),
            mru: None,
            swap_slot: None,
        }
    }

    /// Returns the VMA containing `va`, checking the MRU slot before
    /// falling back to a linear scan of the ordered list.
    pub(crate) fn find_vma(&mut self, va: VirtAddr) -> Option<Vma> {
        if let Some(i) = self.mru {
            if self.vmas[i].contains(va) {
                return Some(self.vmas[i]);
            }
        }
        for (i, vma) in self.vmas.iter().enumerate() {
            if vma.contains(va) {
                self.mru = Some(i);
                return Some(*vma);
            }
        }
        None
    }

    /// Insert `vma` keeping ascending `start` order. Fatal assertion if
    /// it overlaps an existing VMA.
    pub(crate) fn insert_vma(&mut self, vma: Vma) {
        let pos = self.vmas.partition_point(|v| v.start < vma.start);
        if pos > 0 {
            assert!(!self.vmas[pos - 1].overlaps(&vma), "VMA overlaps preceding neighbor");
        }
        if pos < self.vmas.len() {
            assert!(!self.vmas[pos].overlaps(&vma), "VMA overlaps following neighbor");
        }
        self.vmas.insert(pos, vma);
        self.mru = None;
    }

    /// Page-align `[va, va+len)` outward and insert a VMA covering it.
    /// Fails (returns `None`) if any byte falls outside the user half or
    /// overlaps an existing VMA.
    pub(crate) fn map_area(&mut self, va: VirtAddr, len: usize, flags: VmaFlags) -> Option<Vma> {
        let start = va.round_down();
        let end = VirtAddr(va.0 + len as u32).round_up();
        if end.0 > ULIM {
            return None;
        }
        let vma = Vma { start, end, flags };
        let pos = self.vmas.partition_point(|v| v.start < vma.start);
        if pos > 0 && self.vmas[pos - 1].overlaps(&vma) {
            return None;
        }
        if pos < self.vmas.len() && self.vmas[pos].overlaps(&vma) {
            return None;
        }
        self.insert_vma(vma);
        Some(vma)
    }

    /// For each VMA in `other`, create a peer VMA in `self` with
    /// identical bounds and flags, front-to-back, then eagerly
    /// `dup_range` the corresponding PTEs.
    pub(crate) fn dup_from(&mut self, other: &mut AddressSpace, frames: &mut impl FrameOwner) {
        for vma in other.vmas.iter() {
            self.insert_vma(*vma);
        }
        for vma in other.vmas.iter() {
            self.pgdir.dup_range(&mut other.pgdir, vma.start, vma.end, frames);
        }
    }

    /// `unmap_range` every VMA, then `exit_range` each one in turn, free
    /// the VMAs and the directory's own self-map frame. Precondition: no
    /// other holder remains (enforced by the caller, which only calls
    /// this once `Arc::strong_count == 1`).
    pub(crate) fn teardown(&mut self, frames: &mut impl FrameOwner) {
        for vma in self.vmas.iter() {
            self.pgdir.unmap_range(vma.start, vma.end, frames, false);
        }
        for vma in self.vmas.iter() {
            self.pgdir.exit_range(vma.start, vma.end, frames);
        }
        self.vmas.clear();
        self.mru = None;
        if let Some(pa) = self.pgdir.own_pa() {
            frames.decref(pa);
        }
    }

    /// `true` iff `[va, va+len)` is entirely covered by VMAs whose flags
    /// permit the requested access; a `STACK` VMA's first page is a
    /// guard that is never accessible even if flags would otherwise
    /// permit it.
    pub(crate) fn user_check(&mut self, va: VirtAddr, len: usize, writable: bool) -> bool {
        if len == 0 {
            return true;
        }
        let start = va.round_down();
        let end = VirtAddr(va.0 + len as u32).round_up();
        let mut cur = start;
        while cur < end {
            let Some(vma) = self.find_vma(cur) else { return false };
            if writable && !vma.flags.contains(VmaFlags::WRITE) {
                return false;
            }
            if !writable && !(vma.flags.contains(VmaFlags::READ) || vma.flags.contains(VmaFlags::EXEC)) {
                return false;
            }
            if vma.flags.contains(VmaFlags::STACK) && cur == vma.start {
                return false;
            }
            cur = VirtAddr(cur.0 + PGSIZE);
        }
        true
    }

    pub(crate) fn vmas(&self) -> &[Vma] {
        &self.vmas
    }
}

/// Convenience alias used by [`crate::sched::task::Task::mm`]: an
/// address space shared by every thread in the same task group.
pub(crate) type SharedAddressSpace = Arc<Mutex<AddressSpace>>;

pub(crate) fn frame_id_of(pa: PhysAddr) -> FrameId {
    FrameId(pa.frame_index() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame::FrameTable;

    fn kernel_pgdir() -> PageDirectory {
        PageDirectory::new()
    }

    fn new_frame_table(npages: usize) -> (FrameTable, alloc::boxed::Box<[u8]>) {
        let mut mem = alloc::vec![0u8; npages * PGSIZE as usize].into_boxed_slice();
        let base = mem.as_mut_ptr();
        let mut frames = FrameTable::new(npages, base);
        frames.init_region(crate::mm::frame::FrameId(0), npages);
        (frames, mem)
    }

    fn new_space(frames: &mut FrameTable) -> AddressSpace {
        AddressSpace::create(&kernel_pgdir(), frames)
    }

    /// VMAs inserted out of order still yield correct `find_vma` results.
    #[test]
    fn find_vma_after_out_of_order_inserts() {
        let (mut frames, _mem) = new_frame_table(4);
        let mut space = new_space(&mut frames);
        space.insert_vma(Vma { start: VirtAddr(15), end: VirtAddr(17), flags: VmaFlags::READ });
        space.insert_vma(Vma { start: VirtAddr(5), end: VirtAddr(7), flags: VmaFlags::READ });
        space.insert_vma(Vma { start: VirtAddr(10), end: VirtAddr(12), flags: VmaFlags::READ });

        assert_eq!(space.find_vma(VirtAddr(11)).unwrap().start, VirtAddr(10));
        assert!(space.find_vma(VirtAddr(12)).is_none());
        assert!(space.find_vma(VirtAddr(4)).is_none());
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn insert_vma_overlap_is_fatal() {
        let (mut frames, _mem) = new_frame_table(4);
        let mut space = new_space(&mut frames);
        space.insert_vma(Vma { start: VirtAddr(0), end: VirtAddr(PGSIZE * 2), flags: VmaFlags::READ });
        space.insert_vma(Vma { start: VirtAddr(PGSIZE), end: VirtAddr(PGSIZE * 3), flags: VmaFlags::READ });
    }

    #[test]
    fn map_area_then_find_vma_round_trips() {
        let (mut frames, _mem) = new_frame_table(4);
        let mut space = new_space(&mut frames);
        let vma = space.map_area(VirtAddr(0), PGSIZE as usize, VmaFlags::READ | VmaFlags::WRITE).unwrap();
        assert_eq!(space.find_vma(VirtAddr(0)).unwrap().start, vma.start);
        assert!(space.find_vma(VirtAddr(vma.end.0)).is_none());
    }

    #[test]
    fn user_check_rejects_stack_guard_page() {
        let (mut frames, _mem) = new_frame_table(8);
        let mut space = new_space(&mut frames);
        space.map_area(VirtAddr(0), PGSIZE as usize * 4, VmaFlags::READ | VmaFlags::WRITE | VmaFlags::STACK).unwrap();
        assert!(!space.user_check(VirtAddr(0), PGSIZE as usize, true));
        assert!(space.user_check(VirtAddr(PGSIZE), PGSIZE as usize, true));
    }

    #[test]
    fn dup_from_is_isolated_from_source() {
        let (mut frames, _mem) = new_frame_table(16);

        let mut src = new_space(&mut frames);
        src.map_area(VirtAddr(0), PGSIZE as usize, VmaFlags::READ | VmaFlags::WRITE).unwrap();
        let pa = frames.alloc_zeroed().unwrap();
        src.pgdir.map(VirtAddr(0), pa, crate::constants::PteFlags::USER | crate::constants::PteFlags::WRITABLE, &mut frames, false);
        unsafe {
            *frames.as_mut_ptr(pa) = 7;
        }

        let mut dst = new_space(&mut frames);
        dst.dup_from(&mut src, &mut frames);

        let (_, _, raw) = dst.pgdir.lookup(VirtAddr(0), &mut frames).unwrap();
        let dst_pa = PhysAddr(raw & !0xfff);
        assert_ne!(dst_pa.0, pa.0);
        unsafe {
            assert_eq!(*frames.as_mut_ptr(dst_pa), 7);
        }
    }
}
