//! User-controlled memory: new_pages and remove_pages.
//!
//! Every region handed out is remembered in the process's memregion table,
//! so remove_pages can take back exactly what was given without trusting a
//! length from user space.

use crate::errors::{KernelError, KernelResult};
use crate::kernel_panic;
use crate::memory::regions::MAX_REGION_PAGES;
use crate::memory::{is_page_aligned, page, MemType, PAGE_SIZE};
use crate::scheduler;

/// Maps `len` bytes of fresh writable user memory at `base` and records the
/// region. Partial failures roll back completely.
pub fn new_pages(base: u32, len: i32) -> KernelResult<i32> {
    if !is_page_aligned(base) {
        return Err(KernelError::InvalidArg);
    }
    if len <= 0
        || len as usize % PAGE_SIZE != 0
        || len as usize > MAX_REGION_PAGES * PAGE_SIZE
    {
        return Err(KernelError::InvalidArg);
    }

    let me = scheduler::get_self();
    let process = unsafe { (*me).process };
    if process.is_null() {
        kernel_panic!("new_pages from an unregistered thread");
    }

    let regions = unsafe { &mut (*process).memregions };
    if regions.is_full() {
        return Err(KernelError::WornOutNewPages);
    }

    let num_pages = len as usize / PAGE_SIZE;

    for i in 0..num_pages {
        if let Err(err) = page::create_page(base + (i * PAGE_SIZE) as u32, MemType::User, None)
        {
            for j in 0..i {
                if page::destroy_page(base + (j * PAGE_SIZE) as u32).is_err() {
                    kernel_panic!("could not take back a page just created");
                }
            }
            return Err(err);
        }
    }

    unsafe {
        core::ptr::write_bytes(base as *mut u8, 0, len as usize);
    }

    regions.record(base, num_pages)?;

    Ok(0)
}

/// Unmaps a region previously created by new_pages.
pub fn remove_pages(base: u32) -> KernelResult<i32> {
    if !is_page_aligned(base) {
        return Err(KernelError::InvalidArg);
    }

    let me = scheduler::get_self();
    let process = unsafe { (*me).process };
    if process.is_null() {
        kernel_panic!("remove_pages from an unregistered thread");
    }

    let regions = unsafe { &mut (*process).memregions };
    let num_pages = regions.remove(base).ok_or(KernelError::PageNotPresent)?;

    for i in 0..num_pages {
        if page::destroy_page(base + (i * PAGE_SIZE) as u32).is_err() {
            kernel_panic!("memory region tracked pages that are not there");
        }
    }

    Ok(0)
}
