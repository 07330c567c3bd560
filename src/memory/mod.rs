//! Virtual-memory engine: physical frame accounting, per-process two-level
//! page tables, zero-fill-on-demand and copy-on-write.

pub mod frame;
pub mod page;
pub mod regions;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_TABLE_ENTRIES: usize = 1024;

/// One megabyte of conventional memory below the hole.
pub const LOWER_MEM_SIZE: u32 = 1 << 20;

/// Everything below this address is direct-mapped kernel memory, everything
/// above is user frames handed out by the frame allocator.
pub const USER_MEM_START: u32 = 0x0100_0000;

pub fn page_align_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

pub fn is_page_aligned(addr: u32) -> bool {
    addr % PAGE_SIZE as u32 == 0
}

/// What a page is mapped for; decides its protection bits and fill policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    Text,
    RoData,
    Data,
    Bss,
    Heap,
    Stack,
    User,
}

impl MemType {
    pub fn writable(self) -> bool {
        !matches!(self, MemType::Text | MemType::RoData)
    }
}

/// Brings up the kernel heap and the paging infrastructure.
/// `upper_mem_kb` is the size of memory above the 1 MiB hole, in KiB.
pub fn init(upper_mem_kb: u32) {
    crate::allocator::init_heap();
    crate::log_info!("Kernel heap initialized.");

    if let Err(err) = page::install(upper_mem_kb) {
        crate::kernel_panic!("unable to install paging: {:?}", err);
    }
    crate::log_info!("Paging installed, {} KiB of upper memory.", upper_mem_kb);
}
