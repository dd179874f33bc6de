//! Turns the BIOS memory map the bootstrap deposits at physical `0x8000`
//! into initialized [`FrameTable`] regions (grounded in ucore's
//! `pmm.c:page_init`). Everything upstream of this — protected-mode/
//! paging setup, the GDT, and the E820 probe itself — is the
//! bootstrap's job, not this core's.

use crate::constants::{KMEM_SIZE, PGSIZE};
use crate::mm::frame::{FrameId, FrameTable};

const E820_MAP_ADDR: usize = 0x8000;
const E820_USABLE: u32 = 1;
const MAX_E820_ENTRIES: usize = 20;

#[repr(C)]
#[derive(Clone, Copy)]
struct E820Entry {
    addr: u64,
    size: u64,
    kind: u32,
}

#[repr(C)]
struct E820Map {
    nr_map: u32,
    entries: [E820Entry; MAX_E820_ENTRIES],
}

/// Frames below this mark hold the kernel image, the boot page
/// directory, and this module's own early allocations; the bootstrap
/// loads the kernel there; so the frame allocator must never hand them
/// out. A production build would derive the exact figure from the
/// linker's `_end` symbol, which belongs to the bootstrap/link step —
/// this fixed high-water mark is the pragmatic stand-in (see
/// DESIGN.md).
const KERNEL_RESERVED_BYTES: u64 = 4 * 1024 * 1024;

fn round_up_page(addr: u64) -> u64 {
    let pgsize = PGSIZE as u64;
    (addr + pgsize - 1) / pgsize * pgsize
}

fn round_down_page(addr: u64) -> u64 {
    let pgsize = PGSIZE as u64;
    addr / pgsize * pgsize
}

/// Parse the E820 map and hand every usable, above-reservation byte
/// range to `frames`: `type == 1` entries are usable RAM, and usable
/// physical memory is capped at `KMemSize`. Safety: the caller must
/// only call this once, after the bootstrap has deposited a
/// well-formed `e820map` at physical `0x8000` and paging
/// identity-maps it.
pub(crate) unsafe fn init_physical_memory(frames: &mut FrameTable) {
    let map = &*(E820_MAP_ADDR as *const E820Map);
    let nr_map = (map.nr_map as usize).min(MAX_E820_ENTRIES);

    for entry in &map.entries[..nr_map] {
        if entry.kind != E820_USABLE {
            continue;
        }
        let begin = entry.addr.max(KERNEL_RESERVED_BYTES);
        let end = (entry.addr + entry.size).min(KMEM_SIZE as u64);
        if begin >= end {
            continue;
        }
        let begin = round_up_page(begin);
        let end = round_down_page(end);
        if begin >= end {
            continue;
        }
        let base_frame = FrameId((begin / PGSIZE as u64) as u32);
        let n = ((end - begin) / PGSIZE as u64) as usize;
        frames.init_region(base_frame, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_page_is_identity_on_aligned_addresses() {
        assert_eq!(round_up_page(0), 0);
        assert_eq!(round_up_page(PGSIZE as u64), PGSIZE as u64);
    }

    #[test]
    fn round_up_page_rounds_into_the_next_page() {
        assert_eq!(round_up_page(1), PGSIZE as u64);
        assert_eq!(round_up_page(PGSIZE as u64 + 1), 2 * PGSIZE as u64);
    }

    #[test]
    fn round_down_page_truncates_to_the_page() {
        assert_eq!(round_down_page(PGSIZE as u64 - 1), 0);
        assert_eq!(round_down_page(PGSIZE as u64), PGSIZE as u64);
        assert_eq!(round_down_page(PGSIZE as u64 + 1), PGSIZE as u64);
    }
}
