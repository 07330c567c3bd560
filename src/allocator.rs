//! Kernel heap. The heap lives in the direct-mapped kernel region, so every
//! allocation is visible at the same address in all address spaces.

use core::alloc::Layout;

use linked_list_allocator::LockedHeap;

use crate::memory::PAGE_SIZE;

#[cfg_attr(not(test), global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Heap placement: 8 MiB..16 MiB, directly below the start of user memory.
pub const HEAP_START: usize = 0x0080_0000;
pub const HEAP_SIZE: usize = 0x0080_0000;

pub fn init_heap() {
    unsafe {
        ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE);
    }
}

fn page_layout(pages: usize) -> Layout {
    Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).expect("bad page layout")
}

/// Allocates `pages` contiguous, page-aligned, zeroed kernel pages.
/// Returns a null pointer when the heap is exhausted.
pub fn alloc_kernel_pages(pages: usize) -> *mut u8 {
    unsafe { alloc::alloc::alloc_zeroed(page_layout(pages)) }
}

/// Releases pages obtained from [`alloc_kernel_pages`].
pub unsafe fn free_kernel_pages(ptr: *mut u8, pages: usize) {
    alloc::alloc::dealloc(ptr, page_layout(pages));
}
