//! The physical frame allocator.
//!
//! One byte of reference count per user frame. A count above one means the
//! frame is shared copy-on-write and must not be writable through any page
//! table entry. Counts saturate at 255: a share attempt on a saturated
//! frame is refused and the caller falls back to a private copy.

use alloc::vec;
use alloc::vec::Vec;

use crate::errors::{KernelError, KernelResult};
use crate::kcell::KCell;
use crate::kernel_panic;
use crate::memory::page;
use crate::memory::{is_page_aligned, LOWER_MEM_SIZE, PAGE_SIZE, USER_MEM_START};
use crate::sync::Mutex;

pub struct FrameTable {
    counts: Vec<u8>,
    /// Hint: a frame nobody holds, or None when every frame is taken.
    next_available: Option<usize>,
}

impl FrameTable {
    pub fn new(frames: usize) -> FrameTable {
        FrameTable {
            counts: vec![0u8; frames],
            next_available: if frames > 0 { Some(0) } else { None },
        }
    }

    /// Frame index of a physical address; None for kernel memory.
    pub fn frame_id(paddr: u32) -> Option<usize> {
        if paddr < USER_MEM_START {
            None
        } else {
            Some(((paddr - USER_MEM_START) as usize) >> 12)
        }
    }

    pub fn frame_addr(id: usize) -> u32 {
        ((id as u32) << 12) + USER_MEM_START
    }

    pub fn refcount(&self, id: usize) -> u8 {
        self.counts[id]
    }

    /// Hands out an unowned frame with a count of one.
    pub fn allocate(&mut self) -> KernelResult<u32> {
        let id = self.next_available.ok_or(KernelError::NoFrames)?;
        let frame = Self::frame_addr(id);

        if self.acquire(frame).is_err() {
            kernel_panic!("free frame {:#x} refused acquisition", frame);
        }

        Ok(frame)
    }

    /// Adds one owner to `frame`. Refuses kernel frames and frames whose
    /// count is saturated.
    pub fn acquire(&mut self, frame: u32) -> KernelResult<()> {
        if !is_page_aligned(frame) {
            return Err(KernelError::InvalidArg);
        }
        let id = Self::frame_id(frame).ok_or(KernelError::KernelFrame)?;
        if id >= self.counts.len() {
            return Err(KernelError::InvalidArg);
        }

        if self.counts[id] == u8::MAX {
            return Err(KernelError::TooManyFrameOwners);
        }
        self.counts[id] += 1;

        if Some(id) == self.next_available {
            self.next_available = self.find_free_from(id);
        }

        Ok(())
    }

    /// Drops one owner; the frame rejoins the free pool at count zero.
    pub fn release(&mut self, frame: u32) -> KernelResult<()> {
        if !is_page_aligned(frame) {
            return Err(KernelError::InvalidArg);
        }
        let id = Self::frame_id(frame).ok_or(KernelError::KernelFrame)?;
        if id >= self.counts.len() {
            return Err(KernelError::InvalidArg);
        }

        if self.counts[id] == 0 {
            return Err(KernelError::FreeOwnerlessFrame);
        }
        self.counts[id] -= 1;

        if self.counts[id] == 0 && self.next_available.is_none() {
            self.next_available = Some(id);
        }

        Ok(())
    }

    fn find_free_from(&self, start: usize) -> Option<usize> {
        let n = self.counts.len();
        (0..n)
            .map(|i| (start + i) % n)
            .find(|&f| self.counts[f] == 0)
    }
}

struct FrameGlobals {
    table: KCell<Option<FrameTable>>,
    /// Kernel-private scratch page for copy-on-write transfers.
    cow_buffer: KCell<*mut u8>,
}

unsafe impl Sync for FrameGlobals {}

static FA_LOCK: Mutex = Mutex::new();
static COW_BUFFER_LOCK: Mutex = Mutex::new();
static GLOBALS: FrameGlobals = FrameGlobals {
    table: KCell::new(None),
    cow_buffer: KCell::new(core::ptr::null_mut()),
};

/// Sizes the frame table from the boot-reported upper memory (KiB).
pub fn init(upper_mem_kb: u32) -> KernelResult<()> {
    let total = LOWER_MEM_SIZE as u64 + upper_mem_kb as u64 * 1024;
    if total <= USER_MEM_START as u64 {
        return Err(KernelError::NoFrames);
    }
    let frames = ((total - USER_MEM_START as u64) / PAGE_SIZE as u64) as usize;

    let buffer = crate::allocator::alloc_kernel_pages(1);
    if buffer.is_null() {
        return Err(KernelError::MallocFail);
    }

    unsafe {
        *GLOBALS.table.get() = Some(FrameTable::new(frames));
        *GLOBALS.cow_buffer.get() = buffer;
    }

    crate::log_info!("Frame allocator manages {} user frames.", frames);
    Ok(())
}

fn with_table<R>(f: impl FnOnce(&mut FrameTable) -> R) -> R {
    FA_LOCK.lock();
    let result = {
        let table = unsafe { GLOBALS.table.get() };
        match table.as_mut() {
            Some(table) => f(table),
            None => kernel_panic!("frame allocator used before init"),
        }
    };
    FA_LOCK.unlock();
    result
}

pub fn allocate_frame() -> KernelResult<u32> {
    with_table(|t| t.allocate())
}

pub fn acquire_frame(frame: u32) -> KernelResult<()> {
    with_table(|t| t.acquire(frame))
}

pub fn release_frame(frame: u32) -> KernelResult<()> {
    with_table(|t| t.release(frame))
}

pub fn frame_refcount(frame: u32) -> Option<u8> {
    with_table(|t| FrameTable::frame_id(frame).map(|id| t.refcount(id)))
}

/// Gives the calling thread an exclusive copy of the page at `page_addr`.
///
/// If the process turns out to be the sole holder nothing is copied; the
/// fault handler has already restored the write bit. Otherwise the contents
/// move through the kernel scratch page into a fresh frame, the page table
/// entry is retargeted and the old frame loses one owner.
pub fn copy_on_write(page_addr: u32) -> KernelResult<()> {
    if !is_page_aligned(page_addr) {
        return Err(KernelError::InvalidArg);
    }

    let pte = unsafe { page::current_pte(page_addr) };
    let pte = match pte {
        Some(pte) => pte,
        None => kernel_panic!("copy on write on an unmapped page {:#x}", page_addr),
    };
    let old_frame = unsafe { (*pte).addr() };
    let old_id = match FrameTable::frame_id(old_frame) {
        Some(id) => id,
        None => kernel_panic!("copy on write on kernel frame {:#x}", old_frame),
    };

    FA_LOCK.lock();
    let table = unsafe { GLOBALS.table.get() }.as_mut().unwrap_or_else(|| {
        kernel_panic!("frame allocator used before init");
    });

    match table.refcount(old_id) {
        1 => {
            // Sole holder: the write bit is already back, nothing to copy
            FA_LOCK.unlock();
            return Ok(());
        }
        0 => {
            FA_LOCK.unlock();
            return Err(KernelError::FreeOwnerlessFrame);
        }
        _ => {}
    }

    let new_frame = match table.allocate() {
        Ok(frame) => frame,
        Err(err) => {
            FA_LOCK.unlock();
            return Err(err);
        }
    };

    let buffer = unsafe { *GLOBALS.cow_buffer.get() };
    COW_BUFFER_LOCK.lock();
    unsafe {
        core::ptr::copy_nonoverlapping(page_addr as *const u8, buffer, PAGE_SIZE);
        (*pte).set_addr(new_frame);
        page::flush_tlb();
        core::ptr::copy_nonoverlapping(buffer, page_addr as *mut u8, PAGE_SIZE);
    }
    COW_BUFFER_LOCK.unlock();

    if table.release(FrameTable::frame_addr(old_id)).is_err() {
        kernel_panic!("shared frame {:#x} lost its owners mid-copy", old_frame);
    }

    FA_LOCK.unlock();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_counts_and_reuses() {
        let mut table = FrameTable::new(3);

        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        let c = table.allocate().unwrap();
        assert_eq!(table.allocate(), Err(KernelError::NoFrames));

        assert_eq!(FrameTable::frame_id(a), Some(0));
        assert_eq!(FrameTable::frame_id(b), Some(1));
        assert_eq!(FrameTable::frame_id(c), Some(2));

        table.release(b).unwrap();
        assert_eq!(table.allocate().unwrap(), b);
    }

    #[test]
    fn sharing_and_releasing_balance() {
        let mut table = FrameTable::new(2);
        let frame = table.allocate().unwrap();

        table.acquire(frame).unwrap();
        table.acquire(frame).unwrap();
        assert_eq!(table.refcount(0), 3);

        table.release(frame).unwrap();
        table.release(frame).unwrap();
        table.release(frame).unwrap();
        assert_eq!(table.refcount(0), 0);
        assert_eq!(table.release(frame), Err(KernelError::FreeOwnerlessFrame));
    }

    #[test]
    fn counts_saturate_at_255() {
        let mut table = FrameTable::new(1);
        let frame = table.allocate().unwrap();
        for _ in 1..255 {
            table.acquire(frame).unwrap();
        }
        assert_eq!(table.refcount(0), 255);
        assert_eq!(table.acquire(frame), Err(KernelError::TooManyFrameOwners));
    }

    #[test]
    fn kernel_frames_are_refused() {
        let mut table = FrameTable::new(1);
        assert_eq!(table.acquire(0x1000), Err(KernelError::KernelFrame));
        assert_eq!(table.release(0x1000), Err(KernelError::KernelFrame));
        assert_eq!(FrameTable::frame_id(USER_MEM_START - 1), None);
    }

    #[test]
    fn unaligned_addresses_are_refused() {
        let mut table = FrameTable::new(1);
        assert_eq!(
            table.acquire(USER_MEM_START + 12),
            Err(KernelError::InvalidArg)
        );
    }
}
