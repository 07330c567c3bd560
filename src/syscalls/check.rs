//! Validation of user-supplied pointers.
//!
//! Nothing from user space is dereferenced before the current page table
//! says the access would succeed. Checks walk page by page; strings are
//! bounded at 4096 bytes and string arrays at 1024 entries.

use alloc::string::String;
use alloc::vec::Vec;

use crate::errors::{KernelError, KernelResult};
use crate::memory::page::{self, EntryFlags};
use crate::memory::{page_align_down, PAGE_SIZE};

pub const STR_MAX_LEN: usize = 4096;
pub const STRARR_MAX_SIZE: usize = 1024;

/// Whether user code could touch `addr` without faulting fatally. A page
/// still marked zero-fill or copy-on-write counts as writable: the write
/// bit shows up as soon as the fault path materializes the page.
pub fn check_page(addr: u32, write: bool) -> bool {
    unsafe {
        match page::current_pte(page_align_down(addr)) {
            Some(pte) => {
                let entry = *pte;
                if !entry.has(EntryFlags::PRESENT) {
                    return false;
                }
                if write {
                    entry.has(EntryFlags::USER)
                        && (entry.has(EntryFlags::READ_WRITE)
                            || entry.has(EntryFlags::ZERO_PAGE)
                            || entry.has(EntryFlags::COPY_ON_WRITE))
                } else {
                    true
                }
            }
            None => false,
        }
    }
}

/// Page-steps across `[buf, buf + len)`.
pub fn check_buffer(buf: u32, len: usize, write: bool) -> bool {
    let mut cursor = buf;
    let mut checked = 0usize;

    while checked < len {
        if !check_page(cursor, write) {
            return false;
        }
        let page_end = page_align_down(cursor).wrapping_add(PAGE_SIZE as u32);
        checked += (page_end.wrapping_sub(cursor)) as usize;
        cursor = page_end;
        if cursor == 0 && checked < len {
            // Wrapped past the top of the address space
            return false;
        }
    }

    true
}

/// Copies a NUL-terminated user string into the kernel, or nothing if it is
/// unmapped or unterminated within the limit.
pub fn copy_string(addr: u32) -> Option<String> {
    let mut bytes = Vec::new();
    let mut cursor = addr;

    while bytes.len() < STR_MAX_LEN {
        if !check_page(cursor, false) {
            return None;
        }
        let page_end = page_align_down(cursor).wrapping_add(PAGE_SIZE as u32);

        while cursor != page_end && bytes.len() < STR_MAX_LEN {
            let byte = unsafe { *(cursor as *const u8) };
            if byte == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(byte);
            cursor = cursor.wrapping_add(1);
        }

        if cursor == 0 {
            return None;
        }
    }

    None
}

/// Copies a null-terminated array of user strings into the kernel.
pub fn copy_string_array(addr: u32) -> KernelResult<Vec<String>> {
    let mut args = Vec::new();
    let mut cursor = addr;

    while args.len() <= STRARR_MAX_SIZE {
        if !check_page(cursor, false) {
            return Err(KernelError::InvalidArg);
        }

        let ptr = unsafe { *(cursor as *const u32) };
        if ptr == 0 {
            return Ok(args);
        }

        let arg = copy_string(ptr).ok_or(KernelError::InvalidArg)?;
        args.push(arg);
        cursor = cursor.wrapping_add(4);
    }

    Err(KernelError::ArrayLength)
}

/// Reads a packed argument array: `N` words the trap placed behind a single
/// user pointer.
pub fn read_args<const N: usize>(base: u32) -> Option<[u32; N]> {
    if !check_buffer(base, N * 4, false) {
        return None;
    }

    let mut args = [0u32; N];
    for (i, slot) in args.iter_mut().enumerate() {
        *slot = unsafe { *((base + (i as u32) * 4) as *const u32) };
    }
    Some(args)
}
