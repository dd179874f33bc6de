// Some of codes come from https://github.com/redox-os/kernel/blob/master/src/allocator/linked_list.rs

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use linked_list_allocator::Heap;
use spin::Mutex;

static HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

/// Hand the kernel heap its backing region. Must run once, before the
/// first `alloc`/`dealloc` through [`HeapAllocator`].
pub(crate) unsafe fn init(offset: usize, size: usize) {
    HEAP.lock().init(offset as *mut u8, size);
}

pub(crate) struct HeapAllocator;

unsafe impl GlobalAlloc for HeapAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match HEAP.lock().allocate_first_fit(layout) {
            Err(alloc_err) => {
                panic!("allocation error: {:?}", alloc_err);
            }
            Ok(res) => {
                #[cfg(feature = "debug")]
                kprintln!(
                    "HeapAllocator: allocated for {:?} at 0x{:?}",
                    layout,
                    res.as_ptr()
                );
                res.as_ptr()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        HEAP.lock().deallocate(NonNull::new_unchecked(ptr), layout);
        #[cfg(feature = "debug")]
        kprintln!("HeapAllocator: released {:?}", ptr);
    }
}

#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: HeapAllocator = HeapAllocator;
