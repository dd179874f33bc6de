//! Two-level page-table manager: `VirtAddr`/`PhysAddr` newtypes, PDX/PTX
//! splitting, and the walk/map/unmap family.
//!
//! Frame refcounting lives in [`crate::mm::frame`]; this module only
//! calls through [`FrameOwner`] so it never has to know how frames are
//! arena-indexed.

use core::ops::{Add, Sub};

use crate::constants::{KERN_BASE, NPDENTRIES, NPTENTRIES, PGSHIFT, PGSIZE, PteFlags, SELFMAP_PDX, VPT};
use crate::x86;

extern crate alloc;
use alloc::boxed::Box;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct VirtAddr(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PhysAddr(pub(crate) u32);

impl VirtAddr {
    pub(crate) fn is_aligned(&self) -> bool {
        self.0 % PGSIZE == 0
    }

    pub(crate) fn round_down(&self) -> VirtAddr {
        VirtAddr(self.0 - self.0 % PGSIZE)
    }

    pub(crate) fn round_up(&self) -> VirtAddr {
        if self.0 % PGSIZE == 0 {
            *self
        } else {
            VirtAddr(self.0 - self.0 % PGSIZE + PGSIZE)
        }
    }

    pub(crate) fn pdx(&self) -> usize {
        ((self.0 >> 22) & 0x3ff) as usize
    }

    pub(crate) fn ptx(&self) -> usize {
        ((self.0 >> 12) & 0x3ff) as usize
    }

    pub(crate) fn offset(&self) -> u32 {
        self.0 & 0xfff
    }

    pub(crate) fn is_kernel_half(&self) -> bool {
        self.0 >= KERN_BASE
    }
}

impl Add<u32> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: u32) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

impl Sub for VirtAddr {
    type Output = u32;
    fn sub(self, rhs: VirtAddr) -> u32 {
        self.0 - rhs.0
    }
}

impl PhysAddr {
    pub(crate) fn is_aligned(&self) -> bool {
        self.0 % PGSIZE == 0
    }

    pub(crate) fn frame_index(&self) -> usize {
        (self.0 >> PGSHIFT) as usize
    }
}

impl Add<u32> for PhysAddr {
    type Output = PhysAddr;
    fn add(self, rhs: u32) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

/// The page-table manager's view of the frame table: allocate a fresh
/// zeroed frame for a new page table, and adjust a frame's refcount as
/// PTEs/PDEs start or stop pointing at it. Implemented by
/// [`crate::mm::frame::FrameTable`] so this module never touches the
/// arena directly.
pub(crate) trait FrameOwner {
    fn alloc_zeroed(&mut self) -> Option<PhysAddr>;
    fn incref(&mut self, pa: PhysAddr);
    /// Decrement refcount; frees the frame back to the allocator if it
    /// reaches zero.
    fn decref(&mut self, pa: PhysAddr);
    /// Translate a frame's physical base to a kernel-accessible pointer
    /// to its contents, used to zero/copy page and page-table data.
    fn as_mut_ptr(&mut self, pa: PhysAddr) -> *mut u8;
}

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
struct Pte(u32);

impl Pte {
    const fn empty() -> Pte {
        Pte(0)
    }

    fn is_present(&self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// `true` for a swap entry: `P=0` but the word is nonzero.
    fn is_swap_entry(&self) -> bool {
        !self.is_present() && self.0 != 0
    }

    fn addr(&self) -> PhysAddr {
        PhysAddr(self.0 & !0xfff)
    }

    fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & 0xfff)
    }

    fn set(&mut self, pa: PhysAddr, flags: PteFlags) {
        self.0 = pa.0 | flags.bits();
    }

    fn set_raw(&mut self, raw: u32) {
        self.0 = raw;
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
struct PageTable {
    entries: [Pte; NPTENTRIES],
}

impl PageTable {
    const fn empty() -> PageTable {
        PageTable {
            entries: [Pte::empty(); NPTENTRIES],
        }
    }
}

/// A two-level page directory. Owns its page tables (as heap `Box`es
/// under the kernel allocator) rather than raw arena frames — the
/// physical-frame identity that the refcounting invariant cares about is
/// tracked separately through [`FrameOwner`]; what this struct holds is
/// the kernel-virtual access path to PDE/PTE contents.
///
/// `self_pa`, once installed, is the directory's own physical identity:
/// slot [`SELFMAP_PDX`] is a PDE pointing back at that frame, so the
/// directory (and, by walking one level further, whichever page table a
/// `va` falls under) is reachable at the fixed virtual address `VPT`
/// instead of through a raw back-reference.
#[repr(C, align(4096))]
pub(crate) struct PageDirectory {
    entries: [Pde; NPDENTRIES],
    tables: [Option<Box<PageTable>>; NPDENTRIES],
    self_pa: Option<PhysAddr>,
}

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
struct Pde(u32);

impl Pde {
    const fn empty() -> Pde {
        Pde(0)
    }

    fn is_present(&self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    fn addr(&self) -> PhysAddr {
        PhysAddr(self.0 & !0xfff)
    }

    fn set(&mut self, pa: PhysAddr, flags: PteFlags) {
        self.0 = pa.0 | flags.bits();
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

const NONE_TABLE: Option<Box<PageTable>> = None;

impl PageDirectory {
    pub(crate) fn new() -> PageDirectory {
        PageDirectory {
            entries: [Pde::empty(); NPDENTRIES],
            tables: [NONE_TABLE; NPDENTRIES],
            self_pa: None,
        }
    }

    /// Install the self-map PDE at [`SELFMAP_PDX`], pointing at `own_pa`.
    /// `own_pa` is a frame `frames` has already allocated and increffed
    /// on the caller's behalf to serve as this directory's physical
    /// identity; the caller owns freeing it (via [`PageDirectory::own_pa`]
    /// and `frames.decref`) once the directory is torn down.
    pub(crate) fn install_self_map(&mut self, own_pa: PhysAddr) {
        self.entries[SELFMAP_PDX].set(own_pa, PteFlags::PRESENT | PteFlags::WRITABLE);
        self.self_pa = Some(own_pa);
    }

    /// This directory's own physical frame, if the self-map has been
    /// installed.
    pub(crate) fn own_pa(&self) -> Option<PhysAddr> {
        self.self_pa
    }

    /// The fixed virtual address at which the page table covering `va`
    /// would be mapped, via the self-map slot. The single materialization
    /// point for "where is the current PT/PD" address arithmetic.
    pub(crate) fn current_pt_va(va: VirtAddr) -> VirtAddr {
        VirtAddr(VPT + (va.pdx() as u32) * PGSIZE)
    }

    /// The fixed virtual address at which the directory itself is mapped
    /// via its own self-map slot.
    pub(crate) fn current_pd_va() -> VirtAddr {
        VirtAddr(VPT + (SELFMAP_PDX as u32) * PGSIZE)
    }

    /// Walk to the PTE for `va`, creating the page table that would hold
    /// it if `create` is set and it doesn't exist yet.
    fn walk(&mut self, va: VirtAddr, create: bool, frames: &mut impl FrameOwner) -> Option<*mut Pte> {
        let pdx = va.pdx();
        if !self.entries[pdx].is_present() {
            if !create {
                return None;
            }
            let pa = frames.alloc_zeroed()?;
            self.tables[pdx] = Some(Box::new(PageTable::empty()));
            self.entries[pdx].set(pa, PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER);
            frames.incref(pa);
        }
        let table = self.tables[pdx].as_mut().expect("PDE present implies table allocated");
        Some(&mut table.entries[va.ptx()] as *mut Pte)
    }

    /// Install `frame | flags` at `va`, replacing and unmapping whatever
    /// was there before.
    pub(crate) fn map(&mut self, va: VirtAddr, frame: PhysAddr, flags: PteFlags, frames: &mut impl FrameOwner, is_current: bool) {
        let pte_ptr = self.walk(va, true, frames).expect("frame allocation failed in map");
        let pte = unsafe { &mut *pte_ptr };
        if pte.is_present() && pte.addr() != frame {
            frames.decref(pte.addr());
        }
        pte.set(frame, flags | PteFlags::PRESENT);
        frames.incref(frame);
        if is_current {
            x86::invlpg(va.0);
        }
    }

    /// Install a raw swap-entry word (P=0, nonzero) at `va`, used by
    /// [`crate::mm::swap::swap_out`].
    pub(crate) fn set_swap_entry(&mut self, va: VirtAddr, raw: u32, frames: &mut impl FrameOwner, is_current: bool) {
        let pte_ptr = self.walk(va, true, frames).expect("swap entry requires an existing page table");
        let pte = unsafe { &mut *pte_ptr };
        pte.set_raw(raw);
        if is_current {
            x86::invlpg(va.0);
        }
    }

    pub(crate) fn unmap(&mut self, va: VirtAddr, frames: &mut impl FrameOwner, is_current: bool) {
        let Some(pte_ptr) = self.walk(va, false, frames) else { return };
        let pte = unsafe { &mut *pte_ptr };
        if pte.is_present() {
            frames.decref(pte.addr());
        }
        pte.clear();
        if is_current {
            x86::invlpg(va.0);
        }
    }

    /// Clear every PTE in `[start, end)` page by page.
    pub(crate) fn unmap_range(&mut self, start: VirtAddr, end: VirtAddr, frames: &mut impl FrameOwner, is_current: bool) {
        let mut va = start;
        while va < end {
            self.unmap(va, frames, is_current);
            va = va + PGSIZE;
        }
    }

    /// Free every now-empty page table touching `[start, end)` and zero
    /// its PDE.
    pub(crate) fn exit_range(&mut self, start: VirtAddr, end: VirtAddr, frames: &mut impl FrameOwner) {
        let first_pdx = start.pdx();
        let last_pdx = (end.0.saturating_sub(1) / (PGSIZE * NPTENTRIES as u32)) as usize;
        for pdx in first_pdx..=last_pdx.min(NPDENTRIES - 1) {
            if !self.entries[pdx].is_present() {
                continue;
            }
            let empty = self.tables[pdx]
                .as_ref()
                .map(|t| t.entries.iter().all(|e| !e.is_present() && !e.is_swap_entry()))
                .unwrap_or(true);
            if empty {
                let pa = self.entries[pdx].addr();
                frames.decref(pa);
                self.entries[pdx].clear();
                self.tables[pdx] = None;
            }
        }
    }

    /// Copy every present PTE in `[start, end)` from `src` into `self`,
    /// eagerly duplicating frame contents. Copy-on-write sharing is a
    /// possible future optimization, not attempted here.
    pub(crate) fn dup_range(&mut self, src: &mut PageDirectory, start: VirtAddr, end: VirtAddr, frames: &mut impl FrameOwner) {
        let mut va = start;
        while va < end {
            if let Some(src_pte_ptr) = src.walk(va, false, frames) {
                let src_pte = unsafe { &*src_pte_ptr };
                if src_pte.is_present() {
                    let src_pa = src_pte.addr();
                    let dst_pa = frames.alloc_zeroed().expect("dup_range: out of frames");
                    let src_ptr = frames.as_mut_ptr(src_pa);
                    let dst_ptr = frames.as_mut_ptr(dst_pa);
                    unsafe {
                        core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, PGSIZE as usize);
                    }
                    let flags = src_pte.flags();
                    self.map(va, dst_pa, flags, frames, false);
                }
            }
            va = va + PGSIZE;
        }
    }

    /// Look up the PTE for `va` without creating anything. Returns
    /// `(present, writable, raw_word)` so callers (the page-fault path,
    /// `user_check`) can classify without borrowing a raw pointer.
    pub(crate) fn lookup(&mut self, va: VirtAddr, frames: &mut impl FrameOwner) -> Option<(bool, PteFlags, u32)> {
        let pte_ptr = self.walk(va, false, frames)?;
        let pte = unsafe { &*pte_ptr };
        if pte.0 == 0 {
            return None;
        }
        Some((pte.is_present(), pte.flags(), pte.0))
    }

    pub(crate) fn get_pte_raw(&mut self, va: VirtAddr, frames: &mut impl FrameOwner) -> u32 {
        self.walk(va, true, frames)
            .map(|p| unsafe { (*p).0 })
            .unwrap_or(0)
    }

    /// Install the kernel/high-half PDEs from `kernel_pgdir` so every
    /// address space maps the kernel identically above `KERN_BASE`.
    ///
    /// The boot directory's page tables are cloned rather than shared:
    /// each `PageDirectory` owns its `Box<PageTable>` slots outright, so
    /// there is no refcounted/shared-pointer path for a table to live in
    /// two directories at once. The PDE word (including the physical
    /// frame pointer) is copied verbatim; the only forked state is the
    /// kernel-side `Box` that lets this directory's own page-table walk
    /// resolve those entries.
    ///
    /// [`SELFMAP_PDX`] is excluded from the mirrored range: every
    /// directory's self-map points at its own frame, never a shared one,
    /// so it is installed separately via [`PageDirectory::install_self_map`].
    pub(crate) fn copy_kernel_half(&mut self, kernel_pgdir: &PageDirectory) {
        let first_kernel_pdx = VirtAddr(KERN_BASE).pdx();
        for pdx in first_kernel_pdx..SELFMAP_PDX {
            self.entries[pdx] = kernel_pgdir.entries[pdx];
            self.tables[pdx] = kernel_pgdir.tables[pdx]
                .as_ref()
                .map(|t| Box::new(PageTable { entries: t.entries }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFrames {
        next: u32,
        refcounts: alloc::collections::BTreeMap<u32, u32>,
        backing: alloc::collections::BTreeMap<u32, Box<[u8; PGSIZE as usize]>>,
    }

    impl FakeFrames {
        fn new() -> FakeFrames {
            FakeFrames {
                next: 0x1000,
                refcounts: alloc::collections::BTreeMap::new(),
                backing: alloc::collections::BTreeMap::new(),
            }
        }
    }

    impl FrameOwner for FakeFrames {
        fn alloc_zeroed(&mut self) -> Option<PhysAddr> {
            let pa = self.next;
            self.next += PGSIZE;
            self.refcounts.insert(pa, 0);
            self.backing.insert(pa, Box::new([0u8; PGSIZE as usize]));
            Some(PhysAddr(pa))
        }

        fn incref(&mut self, pa: PhysAddr) {
            *self.refcounts.entry(pa.0).or_insert(0) += 1;
        }

        fn decref(&mut self, pa: PhysAddr) {
            if let Some(r) = self.refcounts.get_mut(&pa.0) {
                *r -= 1;
            }
        }

        fn as_mut_ptr(&mut self, pa: PhysAddr) -> *mut u8 {
            self.backing.get_mut(&pa.0).unwrap().as_mut_ptr()
        }
    }

    #[test]
    fn map_then_lookup_round_trips() {
        let mut dir = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let va = VirtAddr(0x2000);
        let frame = PhysAddr(0x5000);
        dir.map(va, frame, PteFlags::USER | PteFlags::WRITABLE, &mut frames, false);
        let (present, flags, _) = dir.lookup(va, &mut frames).unwrap();
        assert!(present);
        assert!(flags.contains(PteFlags::WRITABLE));
    }

    #[test]
    fn unmap_clears_pte_and_decrefs() {
        let mut dir = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let va = VirtAddr(0x2000);
        let frame = PhysAddr(0x5000);
        frames.refcounts.insert(0x5000, 0);
        dir.map(va, frame, PteFlags::USER, &mut frames, false);
        assert_eq!(*frames.refcounts.get(&0x5000).unwrap(), 1);
        dir.unmap(va, &mut frames, false);
        assert_eq!(*frames.refcounts.get(&0x5000).unwrap(), 0);
        assert!(dir.lookup(va, &mut frames).is_none() || !dir.lookup(va, &mut frames).unwrap().0);
    }

    #[test]
    fn remap_same_va_drops_old_frame_ref() {
        let mut dir = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let va = VirtAddr(0x3000);
        let a = PhysAddr(0x6000);
        let b = PhysAddr(0x7000);
        frames.refcounts.insert(0x6000, 0);
        frames.refcounts.insert(0x7000, 0);
        dir.map(va, a, PteFlags::USER, &mut frames, false);
        dir.map(va, b, PteFlags::USER, &mut frames, false);
        assert_eq!(*frames.refcounts.get(&0x6000).unwrap(), 0);
        assert_eq!(*frames.refcounts.get(&0x7000).unwrap(), 1);
    }

    #[test]
    fn unmap_range_then_exit_range_frees_table() {
        let mut dir = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let start = VirtAddr(0x0);
        let end = VirtAddr(PGSIZE * 4);
        for i in 0..4u32 {
            let va = VirtAddr(i * PGSIZE);
            let frame = frames.alloc_zeroed().unwrap();
            dir.map(va, frame, PteFlags::USER, &mut frames, false);
        }
        dir.unmap_range(start, end, &mut frames, false);
        dir.exit_range(start, end, &mut frames);
        assert!(!dir.entries[0].is_present());
        assert!(dir.tables[0].is_none());
    }

    #[test]
    fn copy_kernel_half_is_visible_but_independent() {
        let mut kernel = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let kva = VirtAddr(KERN_BASE + PGSIZE);
        let kframe = frames.alloc_zeroed().unwrap();
        kernel.map(kva, kframe, PteFlags::WRITABLE, &mut frames, false);

        let mut user = PageDirectory::new();
        user.copy_kernel_half(&kernel);
        let (present, _, raw) = user.lookup(kva, &mut frames).unwrap();
        assert!(present);
        assert_eq!(PhysAddr(raw & !0xfff), kframe);

        // Unmapping in the child does not disturb the parent directory.
        user.unmap(kva, &mut frames, false);
        assert!(!user.lookup(kva, &mut frames).map(|(p, _, _)| p).unwrap_or(false));
        assert!(kernel.lookup(kva, &mut frames).unwrap().0);
    }

    #[test]
    fn dup_range_copies_contents_and_is_isolated() {
        let mut src = PageDirectory::new();
        let mut dst = PageDirectory::new();
        let mut frames = FakeFrames::new();
        let va = VirtAddr(0x4000);
        let frame = frames.alloc_zeroed().unwrap();
        unsafe {
            *frames.as_mut_ptr(frame) = 0x42;
        }
        src.map(va, frame, PteFlags::USER | PteFlags::WRITABLE, &mut frames, false);

        dst.dup_range(&mut src, va, VirtAddr(va.0 + PGSIZE), &mut frames);

        let (present, _, raw) = dst.lookup(va, &mut frames).unwrap();
        assert!(present);
        let dst_pa = PhysAddr(raw & !0xfff);
        assert_ne!(dst_pa.0, frame.0);
        unsafe {
            assert_eq!(*frames.as_mut_ptr(dst_pa), 0x42);
            *frames.as_mut_ptr(dst_pa) = 0x99;
        }
        unsafe {
            assert_eq!(*frames.as_mut_ptr(frame), 0x42);
        }
    }
}
