//! Two-level page tables and the page-fault policy.
//!
//! The kernel's low 16 MiB is direct-mapped through a set of page tables
//! built once at boot and shared by every directory; directory entries
//! pointing at them carry the KERNEL flag and are never torn down with a
//! process. User pages are either private, shared read-only against the
//! blank zero frame (ZERO_PAGE), or shared copy-on-write (COPY_ON_WRITE).
//! In the latter two cases the write bit stays clear so the first write
//! faults into the materialization path.

use bitflags::bitflags;

use crate::arch;
use crate::errors::{KernelError, KernelResult};
use crate::kcell::KCell;
use crate::kernel_panic;
use crate::memory::frame;
use crate::memory::{is_page_aligned, page_align_down, MemType};
use crate::memory::{PAGE_SIZE, PAGE_TABLE_ENTRIES, USER_MEM_START};
use crate::sync::Mutex;

pub const ADDR_MASK: u32 = 0xFFFF_F000;
pub const FLAGS_MASK: u32 = 0x0000_0FFF;

/// Directory entries covering the kernel direct map.
pub const KERNEL_DIR_ENTRIES: usize = (USER_MEM_START >> 22) as usize;

bitflags! {
    /// Bits of a page-table or page-directory entry. ZERO_PAGE and KERNEL
    /// share bit 9: it means "backed by the blank frame" on a page entry
    /// and "shared kernel page table" on a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT       = 1 << 0;
        const READ_WRITE    = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const PAGE_SIZE_4M  = 1 << 7;
        const GLOBAL        = 1 << 8;
        const ZERO_PAGE     = 1 << 9;
        const KERNEL        = 1 << 9;
        const COPY_ON_WRITE = 1 << 10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    pub const fn zero() -> Self {
        PageEntry(0)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    pub fn has(self, flags: EntryFlags) -> bool {
        self.0 & FLAGS_MASK & flags.bits() != 0
    }

    pub fn insert(&mut self, flags: EntryFlags) {
        self.0 |= flags.bits();
    }

    pub fn remove(&mut self, flags: EntryFlags) {
        self.0 &= !flags.bits();
    }

    pub fn addr(self) -> u32 {
        self.0 & ADDR_MASK
    }

    pub fn set_addr(&mut self, addr: u32) {
        self.0 = (addr & ADDR_MASK) | (self.0 & FLAGS_MASK);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [PageEntry; PAGE_TABLE_ENTRIES],
}

struct PageGlobals {
    /// The blank read-only frame backing every untouched zero-fill page.
    zero_frame: KCell<u32>,
    /// Scratch page for eager copies when a frame cannot be shared.
    frame_buffer: KCell<*mut u8>,
    /// Kernel page tables shared by all directories.
    kernel_tables: KCell<[*mut PageTable; KERNEL_DIR_ENTRIES]>,
}

unsafe impl Sync for PageGlobals {}

static FRAME_BUFFER_LOCK: Mutex = Mutex::new();
static GLOBALS: PageGlobals = PageGlobals {
    zero_frame: KCell::new(0),
    frame_buffer: KCell::new(core::ptr::null_mut()),
    kernel_tables: KCell::new([core::ptr::null_mut(); KERNEL_DIR_ENTRIES]),
};

fn alloc_table() -> KernelResult<*mut PageTable> {
    let page = crate::allocator::alloc_kernel_pages(1);
    if page.is_null() {
        Err(KernelError::MallocFail)
    } else {
        Ok(page as *mut PageTable)
    }
}

/// One-time paging bring-up: the shared kernel page tables, the zero frame,
/// the copy scratch page and the frame allocator.
pub fn install(upper_mem_kb: u32) -> KernelResult<()> {
    let tables = unsafe { GLOBALS.kernel_tables.get() };
    for (i, slot) in tables.iter_mut().enumerate() {
        let table = alloc_table()?;
        unsafe {
            for (j, entry) in (*table).entries.iter_mut().enumerate() {
                let paddr = ((i * PAGE_TABLE_ENTRIES + j) * PAGE_SIZE) as u32;
                entry.set_addr(paddr);
                entry.insert(EntryFlags::PRESENT | EntryFlags::READ_WRITE | EntryFlags::GLOBAL);
            }
        }
        *slot = table;
    }

    // The zero frame lives in kernel memory; its direct mapping goes
    // read-only so nothing can dirty it.
    let zero = crate::allocator::alloc_kernel_pages(1);
    if zero.is_null() {
        return Err(KernelError::MallocFail);
    }
    let zero = zero as u32;
    unsafe {
        let table = tables[(zero >> 22) as usize];
        (*table).entries[((zero >> 12) & 0x3FF) as usize].remove(EntryFlags::READ_WRITE);
        *GLOBALS.zero_frame.get() = zero;
    }

    let buffer = crate::allocator::alloc_kernel_pages(1);
    if buffer.is_null() {
        return Err(KernelError::MallocFail);
    }
    unsafe {
        *GLOBALS.frame_buffer.get() = buffer;
    }

    frame::init(upper_mem_kb)
}

/// Builds a fresh page directory: kernel mappings shared, user space empty.
pub fn init_directory() -> KernelResult<*mut PageTable> {
    let dir = alloc_table()?;
    let tables = unsafe { GLOBALS.kernel_tables.get() };

    unsafe {
        for (i, table) in tables.iter().enumerate() {
            let entry = &mut (*dir).entries[i];
            entry.set_addr(*table as u32);
            entry.insert(EntryFlags::PRESENT | EntryFlags::KERNEL);
        }
    }

    Ok(dir)
}

/// Switches to `cr3` and turns paging on.
pub unsafe fn activate(cr3: *mut PageTable) {
    arch::write_cr3(cr3 as u32);
    arch::write_cr0(arch::read_cr0() | arch::CR0_PG);
}

pub fn flush_tlb() {
    unsafe { arch::write_cr3(arch::read_cr3()) };
}

pub unsafe fn current_dir() -> *mut PageTable {
    arch::read_cr3() as *mut PageTable
}

pub unsafe fn get_pde(va: u32, cr3: *mut PageTable) -> *mut PageEntry {
    &mut (*cr3).entries[(va >> 22) as usize]
}

pub unsafe fn get_pte(va: u32, cr3: *mut PageTable) -> Option<*mut PageEntry> {
    let pde = get_pde(va, cr3);
    if !(*pde).has(EntryFlags::PRESENT) {
        return None;
    }
    let table = (*pde).addr() as *mut PageTable;
    Some(&mut (*table).entries[((va >> 12) & 0x3FF) as usize])
}

pub unsafe fn current_pte(va: u32) -> Option<*mut PageEntry> {
    get_pte(va, current_dir())
}

/// Maps one user page at `va` in the current address space.
///
/// The shape of the mapping depends on the inputs: `Bss` pages share the
/// zero frame read-only; a reference frame means a copy-on-write share; no
/// reference frame means a private frame, writable when the type allows.
pub fn create_page(va: u32, mem_type: MemType, ref_frame: Option<u32>) -> KernelResult<()> {
    if !is_page_aligned(va) || va < USER_MEM_START {
        return Err(KernelError::InvalidArg);
    }
    if let Some(frame) = ref_frame {
        if !is_page_aligned(frame) || frame < USER_MEM_START {
            return Err(KernelError::InvalidArg);
        }
    }

    // Allocate up front so errors below have a single thing to undo
    let mut new_frame = None;
    if mem_type != MemType::Bss && ref_frame.is_none() {
        new_frame = Some(frame::allocate_frame()?);
    }

    let rollback = |frame: Option<u32>| {
        if let Some(frame) = frame {
            if frame::release_frame(frame).is_err() {
                kernel_panic!("could not return unused frame {:#x}", frame);
            }
        }
    };

    unsafe {
        let cr3 = current_dir();
        let pte = match get_pte(va, cr3) {
            Some(pte) => {
                if (*pte).has(EntryFlags::PRESENT) {
                    rollback(new_frame);
                    return Err(KernelError::PageAlreadyPresent);
                }
                pte
            }
            None => {
                let table = match alloc_table() {
                    Ok(table) => table,
                    Err(err) => {
                        rollback(new_frame);
                        return Err(err);
                    }
                };
                let pde = get_pde(va, cr3);
                (*pde).set_addr(table as u32);
                (*pde).insert(
                    EntryFlags::PRESENT | EntryFlags::READ_WRITE | EntryFlags::USER,
                );
                &mut (*table).entries[((va >> 12) & 0x3FF) as usize] as *mut PageEntry
            }
        };

        (*pte).insert(EntryFlags::PRESENT | EntryFlags::USER);
        if mem_type == MemType::Bss {
            // Zero-fill on demand; the first write faults and materializes
            (*pte).insert(EntryFlags::ZERO_PAGE);
            (*pte).set_addr(*GLOBALS.zero_frame.get());
        } else if let Some(frame) = ref_frame {
            (*pte).insert(EntryFlags::COPY_ON_WRITE);
            (*pte).set_addr(frame);
        } else {
            (*pte).set_addr(new_frame.unwrap());
            if mem_type.writable() {
                (*pte).insert(EntryFlags::READ_WRITE);
            }
        }
    }

    Ok(())
}

/// Unmaps the user page at `va` and returns its frame to the allocator.
pub fn destroy_page(va: u32) -> KernelResult<()> {
    if !is_page_aligned(va) {
        return Err(KernelError::InvalidArg);
    }

    unsafe {
        let pte = current_pte(va).ok_or(KernelError::DirectoryNotPresent)?;

        if !(*pte).has(EntryFlags::PRESENT) {
            return Err(KernelError::PageNotPresent);
        }
        if (*pte).has(EntryFlags::GLOBAL) || !(*pte).has(EntryFlags::USER) {
            return Err(KernelError::KernelPage);
        }

        let zfod = (*pte).has(EntryFlags::ZERO_PAGE);
        let frame = (*pte).addr();
        (*pte).clear();
        flush_tlb();

        // An untouched zero-fill page points at the shared blank frame,
        // which is not the allocator's to take back.
        if !zfod {
            match frame::release_frame(frame) {
                Ok(()) | Err(KernelError::KernelFrame) => {}
                Err(err) => kernel_panic!("frame allocator incoherent: {:?}", err),
            }
        }
    }

    Ok(())
}

/// Drops every user mapping of the current process, keeping the kernel
/// direct map. The exec path calls this to start from a clean slate.
pub fn reset_user_space() {
    unsafe {
        let cr3 = current_dir();

        for pd_index in 0..PAGE_TABLE_ENTRIES {
            let pde = &mut (*cr3).entries[pd_index];
            if !pde.has(EntryFlags::PRESENT) || !pde.has(EntryFlags::USER) {
                continue;
            }
            if pde.has(EntryFlags::KERNEL) {
                continue;
            }

            let table = pde.addr() as *mut PageTable;
            for pt_index in 0..PAGE_TABLE_ENTRIES {
                let pte = &mut (*table).entries[pt_index];
                if !pte.has(EntryFlags::PRESENT)
                    || pte.has(EntryFlags::GLOBAL)
                    || !pte.has(EntryFlags::USER)
                {
                    continue;
                }
                if !pte.has(EntryFlags::ZERO_PAGE) {
                    if let Err(err) = frame::release_frame(pte.addr()) {
                        kernel_panic!("user frame {:#x} unaccounted: {:?}", pte.addr(), err);
                    }
                }
                pte.clear();
            }

            pde.clear();
            crate::allocator::free_kernel_pages(table as *mut u8, 1);
        }

        flush_tlb();
    }
}

/// Tears down a whole directory tree for a dead process: every user frame
/// loses an owner, every private page table and the directory are freed.
///
/// # Safety
/// `cr3` must not be the active directory.
pub unsafe fn destroy_paging(cr3: *mut PageTable) -> KernelResult<()> {
    for pd_index in 0..PAGE_TABLE_ENTRIES {
        let pde = &mut (*cr3).entries[pd_index];
        if !pde.has(EntryFlags::PRESENT) || pde.has(EntryFlags::KERNEL) {
            continue;
        }

        let table = pde.addr() as *mut PageTable;
        for pt_index in 0..PAGE_TABLE_ENTRIES {
            let pte = &mut (*table).entries[pt_index];
            if !pte.has(EntryFlags::PRESENT)
                || pte.has(EntryFlags::ZERO_PAGE)
                || pte.has(EntryFlags::GLOBAL)
                || !pte.has(EntryFlags::USER)
            {
                continue;
            }

            let frame = pte.addr();
            pte.clear();
            match frame::release_frame(frame) {
                Ok(()) | Err(KernelError::KernelFrame) => {}
                Err(err) => kernel_panic!("frame allocator incoherent: {:?}", err),
            }
        }

        pde.clear();
        crate::allocator::free_kernel_pages(table as *mut u8, 1);
    }

    crate::allocator::free_kernel_pages(cr3 as *mut u8, 1);
    Ok(())
}

/// Mirrors the parent's user space into the child's directory for fork.
///
/// Writable pages are shared copy-on-write: both sides lose the write bit
/// and the frame gains an owner. A frame that already has 255 owners cannot
/// be shared further; the child then gets its own eager copy, transferred
/// through the kernel scratch page via the parent's mapping.
///
/// On failure the caller destroys the child's partial tree. The parent may
/// be left with extra COPY_ON_WRITE bits, which is benign: the next write
/// finds a refcount of one and reclaims the page without copying.
pub fn copy_paging(parent_cr3: *mut PageTable, child_cr3: *mut PageTable) -> KernelResult<()> {
    if parent_cr3.is_null() || child_cr3.is_null() {
        return Err(KernelError::ArgNull);
    }

    unsafe {
        for pd_index in 0..PAGE_TABLE_ENTRIES {
            let pde = &mut (*parent_cr3).entries[pd_index];
            if !pde.has(EntryFlags::PRESENT) || !pde.has(EntryFlags::USER) {
                continue;
            }
            if pde.has(EntryFlags::KERNEL) {
                continue;
            }

            let parent_table = pde.addr() as *mut PageTable;
            let child_table = alloc_table()?;

            let child_pde = &mut (*child_cr3).entries[pd_index];
            child_pde.set_addr(child_table as u32);
            child_pde.insert(EntryFlags::PRESENT | EntryFlags::READ_WRITE | EntryFlags::USER);

            for pt_index in 0..PAGE_TABLE_ENTRIES {
                let pte = &mut (*parent_table).entries[pt_index];
                if !pte.has(EntryFlags::PRESENT) || !pte.has(EntryFlags::USER) {
                    continue;
                }

                let child_pte = &mut (*child_table).entries[pt_index];
                *child_pte = *pte;

                let frame = pte.addr();
                match frame::acquire_frame(frame) {
                    Ok(()) => {
                        if pte.has(EntryFlags::READ_WRITE) {
                            // Share lazily: both sides fault on write
                            child_pte.insert(EntryFlags::COPY_ON_WRITE);
                            child_pte.remove(EntryFlags::READ_WRITE);
                            pte.insert(EntryFlags::COPY_ON_WRITE);
                            pte.remove(EntryFlags::READ_WRITE);
                        }
                    }
                    Err(KernelError::KernelFrame) => continue,
                    Err(KernelError::TooManyFrameOwners) => {
                        let fresh = match frame::allocate_frame() {
                            Ok(fresh) => fresh,
                            Err(err) => {
                                child_pte.clear();
                                return Err(err);
                            }
                        };
                        child_pte.set_addr(fresh);
                        child_pte.remove(EntryFlags::COPY_ON_WRITE);
                        child_pte.insert(
                            EntryFlags::PRESENT | EntryFlags::READ_WRITE | EntryFlags::USER,
                        );

                        // The frame sits above the direct map, so the copy
                        // goes through the parent's own mapping: stash the
                        // page, retarget, write it into the fresh frame,
                        // then put the parent back.
                        let va = ((pd_index as u32) << 22) | ((pt_index as u32) << 12);
                        let buffer = *GLOBALS.frame_buffer.get();

                        FRAME_BUFFER_LOCK.lock();
                        core::ptr::copy_nonoverlapping(va as *const u8, buffer, PAGE_SIZE);
                        pte.set_addr(fresh);
                        flush_tlb();
                        core::ptr::copy_nonoverlapping(buffer, va as *mut u8, PAGE_SIZE);
                        pte.set_addr(frame);
                        flush_tlb();
                        FRAME_BUFFER_LOCK.unlock();
                    }
                    Err(err) => {
                        child_pte.clear();
                        return Err(err);
                    }
                }
            }
        }

        flush_tlb();
    }

    Ok(())
}

/// The page-fault path.
///
/// Zero-fill and copy-on-write faults resolve silently. Anything else goes
/// to the thread's software exception handler when one is registered, and
/// otherwise kills the thread (or the kernel, for kernel-mode faults).
pub fn page_fault_handler(tf: &mut crate::scheduler::context::TrapFrame) {
    let addr = arch::read_cr2();
    let page = page_align_down(addr);

    unsafe {
        if let Some(pte) = current_pte(addr) {
            if (*pte).has(EntryFlags::ZERO_PAGE) {
                if let Ok(frame) = frame::allocate_frame() {
                    (*pte).remove(EntryFlags::ZERO_PAGE);
                    (*pte).insert(EntryFlags::READ_WRITE);
                    (*pte).set_addr(frame);
                    flush_tlb();
                    core::ptr::write_bytes(page as *mut u8, 0, PAGE_SIZE);
                    return;
                }
            } else if (*pte).has(EntryFlags::COPY_ON_WRITE) {
                (*pte).remove(EntryFlags::COPY_ON_WRITE);
                (*pte).insert(EntryFlags::READ_WRITE);
                flush_tlb();
                if frame::copy_on_write(page).is_ok() {
                    return;
                }
                // No frame for the private copy; reshare before killing
                (*pte).insert(EntryFlags::COPY_ON_WRITE);
                (*pte).remove(EntryFlags::READ_WRITE);
                flush_tlb();
            }
        }
    }

    crate::interrupts::exceptions::deliver_page_fault(addr, tf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_flag_algebra() {
        let mut entry = PageEntry::zero();
        assert!(entry.is_unused());

        entry.insert(EntryFlags::PRESENT | EntryFlags::USER);
        assert!(entry.has(EntryFlags::PRESENT));
        assert!(entry.has(EntryFlags::USER));
        assert!(!entry.has(EntryFlags::READ_WRITE));

        entry.remove(EntryFlags::USER);
        assert!(!entry.has(EntryFlags::USER));
        assert!(entry.has(EntryFlags::PRESENT));
    }

    #[test]
    fn entry_addr_keeps_flags() {
        let mut entry = PageEntry::zero();
        entry.insert(EntryFlags::PRESENT | EntryFlags::COPY_ON_WRITE);
        entry.set_addr(0x0123_4000);
        assert_eq!(entry.addr(), 0x0123_4000);
        assert!(entry.has(EntryFlags::PRESENT));
        assert!(entry.has(EntryFlags::COPY_ON_WRITE));

        entry.set_addr(0x0456_7000);
        assert_eq!(entry.addr(), 0x0456_7000);
        assert!(entry.has(EntryFlags::COPY_ON_WRITE));
    }

    #[test]
    fn unaligned_addr_is_masked() {
        let mut entry = PageEntry::zero();
        entry.set_addr(0x0123_4ABC);
        assert_eq!(entry.addr(), 0x0123_4000);
    }

    #[test]
    fn kernel_and_zero_page_share_a_bit() {
        // Bit 9 is context dependent; both views must agree
        assert_eq!(EntryFlags::KERNEL.bits(), EntryFlags::ZERO_PAGE.bits());
    }
}
