//! Address-space layout and the flag bitsets shared across `mm`.
//!
//! A flat higher-half split with a
//! fixed `KERN_BASE`, a self-mapped last page directory slot, and an MMIO
//! window just below the kernel stacks. Flag bitsets that used to be raw
//! `u32` constants are `bitflags!` sets instead, so `PteFlags::PRESENT |
//! PteFlags::WRITABLE` reads the way the rest of the crate talks about
//! PTE/PDE attributes.

use bitflags::bitflags;

pub(crate) const KERN_BASE: u32 = 0xf000_0000;
pub(crate) const PGSIZE: u32 = 4096;
pub(crate) const PGSHIFT: u32 = 12;
pub(crate) const NPDENTRIES: usize = 1024;
pub(crate) const NPTENTRIES: usize = 1024;
pub(crate) const PTSIZE: usize = NPTENTRIES * (PGSIZE as usize);

/// The directory's last slot is reserved for the self-map: a PDE that
/// points back at the directory's own physical page, so the current
/// page table (or the directory itself) is reachable at a fixed virtual
/// address instead of through a raw back-reference. Excluded from the
/// range `copy_kernel_half` mirrors across address spaces, since each
/// directory's self-map points at *its own* frame, not a shared one.
pub(crate) const SELFMAP_PDX: usize = NPDENTRIES - 1;
pub(crate) const VPT: u32 = (SELFMAP_PDX as u32) * (PTSIZE as u32);

pub(crate) const KSTACKTOP: u32 = KERN_BASE;
pub(crate) const KSTKSIZE: u32 = 8 * PGSIZE;
pub(crate) const KSTKGAP: u32 = 8 * PGSIZE;
pub(crate) const MMIOLIM: u32 = KSTACKTOP - (PTSIZE as u32);
pub(crate) const MMIOBASE: u32 = MMIOLIM - (PTSIZE as u32);

/// Top of the user half; everything at or above this belongs to the
/// kernel, mapped identically across every address space.
pub(crate) const ULIM: u32 = MMIOBASE;

pub(crate) const KHEAP_BASE: u32 = ULIM - KHEAP_SIZE as u32;
pub(crate) const KHEAP_SIZE: usize = 3 * PTSIZE;

/// Physical memory this core will map and manage, regardless of how much
/// the E820 map reports.
pub(crate) const KMEM_SIZE: u32 = 64 * 1024 * 1024;

/// Highest valid swap slot number; slot 0 is the "no slot" sentinel.
pub(crate) const MAX_SWAP_SLOTS: u32 = 1024;

pub(crate) const CR0_PE: u32 = 0x0000001;
pub(crate) const CR0_MP: u32 = 0x0000002;
pub(crate) const CR0_EM: u32 = 0x0000004;
pub(crate) const CR0_TS: u32 = 0x0000008;
pub(crate) const CR0_ET: u32 = 0x0000010;
pub(crate) const CR0_NE: u32 = 0x0000020;
pub(crate) const CR0_WP: u32 = 0x0010000;
pub(crate) const CR0_AM: u32 = 0x0040000;
pub(crate) const CR0_NW: u32 = 0x2000000;
pub(crate) const CR0_CD: u32 = 0x4000000;
pub(crate) const CR0_PG: u32 = 0x8000000;

bitflags! {
    /// The low 12 bits of a PTE/PDE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct PteFlags: u32 {
        const PRESENT  = 0x001;
        const WRITABLE = 0x002;
        const USER     = 0x004;
        const PWT      = 0x008;
        const PCD      = 0x010;
    }
}

bitflags! {
    /// VMA permission/kind flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct VmaFlags: u8 {
        const READ  = 0b0001;
        const WRITE = 0b0010;
        const EXEC  = 0b0100;
        const STACK = 0b1000;
    }
}

bitflags! {
    /// Frame state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FrameFlags: u8 {
        /// Never allocated; excluded from the free pool (e.g. the BIOS
        /// area below 1MB, or a region outside any usable E820 entry).
        const RESERVED = 0b01;
        /// Marks the head of a free run in the first-fit free list.
        const PROPERTY = 0b10;
    }
}
