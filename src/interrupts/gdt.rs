//! Flat-model GDT: kernel and user code/data covering the full 4 GiB, plus
//! one TSS whose only job is handing the CPU the kernel stack pointer on a
//! user-to-kernel transition.

use crate::arch::{self, DescriptorTablePointer};
use crate::kcell::KCell;

pub const KERNEL_CS: u16 = 0x08;
pub const KERNEL_DS: u16 = 0x10;
// User selectors carry RPL 3
pub const USER_CS: u16 = 0x18 | 3;
pub const USER_DS: u16 = 0x20 | 3;
const TSS_SELECTOR: u16 = 0x28;

/// The hardware task state segment. Only `esp0`/`ss0` matter: everything
/// else is legacy task-switching state this kernel never uses.
#[repr(C, packed)]
pub struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldtr: u32,
    reserved: u16,
    iomap_base: u16,
}

const fn empty_tss() -> TaskStateSegment {
    TaskStateSegment {
        link: 0,
        esp0: 0,
        ss0: 0,
        esp1: 0,
        ss1: 0,
        esp2: 0,
        ss2: 0,
        cr3: 0,
        eip: 0,
        eflags: 0,
        eax: 0,
        ecx: 0,
        edx: 0,
        ebx: 0,
        esp: 0,
        ebp: 0,
        esi: 0,
        edi: 0,
        es: 0,
        cs: 0,
        ss: 0,
        ds: 0,
        fs: 0,
        gs: 0,
        ldtr: 0,
        reserved: 0,
        iomap_base: core::mem::size_of::<TaskStateSegment>() as u16,
    }
}

static TSS: KCell<TaskStateSegment> = KCell::new(empty_tss());
static GDT: KCell<[u64; 6]> = KCell::new([0; 6]);

/// Encodes a segment descriptor. `limit` is in granularity units, `access`
/// the type/DPL/present byte, `flags` the granularity nibble.
pub fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let mut entry: u64 = 0;
    entry |= (limit as u64) & 0xFFFF;
    entry |= ((base as u64) & 0xFF_FFFF) << 16;
    entry |= (access as u64) << 40;
    entry |= (((limit as u64) >> 16) & 0xF) << 48;
    entry |= ((flags as u64) & 0xF) << 52;
    entry |= (((base as u64) >> 24) & 0xFF) << 56;
    entry
}

pub fn init() {
    unsafe {
        let tss = TSS.get();
        tss.ss0 = KERNEL_DS as u32;

        let gdt = GDT.get();
        gdt[0] = 0;
        // 4 KiB granularity, 32-bit, full address space
        gdt[1] = descriptor(0, 0xF_FFFF, 0x9A, 0xC); // kernel code
        gdt[2] = descriptor(0, 0xF_FFFF, 0x92, 0xC); // kernel data
        gdt[3] = descriptor(0, 0xF_FFFF, 0xFA, 0xC); // user code
        gdt[4] = descriptor(0, 0xF_FFFF, 0xF2, 0xC); // user data
        gdt[5] = descriptor(
            tss as *const _ as u32,
            core::mem::size_of::<TaskStateSegment>() as u32 - 1,
            0x89,
            0x0,
        );

        let ptr = DescriptorTablePointer {
            limit: (core::mem::size_of::<[u64; 6]>() - 1) as u16,
            base: gdt.as_ptr() as u32,
        };
        arch::load_gdt(&ptr);
        arch::load_segments(KERNEL_CS, KERNEL_DS);
        arch::load_tss(TSS_SELECTOR);
    }
}

/// Points the CPU at the incoming thread's kernel stack. Called on every
/// context switch.
pub fn set_esp0(esp0: u32) {
    unsafe {
        TSS.get().esp0 = esp0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_kernel_code_descriptor() {
        assert_eq!(descriptor(0, 0xF_FFFF, 0x9A, 0xC), 0x00CF_9A00_0000_FFFF);
    }

    #[test]
    fn flat_user_data_descriptor() {
        assert_eq!(descriptor(0, 0xF_FFFF, 0xF2, 0xC), 0x00CF_F200_0000_FFFF);
    }

    #[test]
    fn tss_descriptor_encodes_base() {
        let entry = descriptor(0x0012_3456, 103, 0x89, 0x0);
        assert_eq!(entry & 0xFFFF, 103);
        assert_eq!((entry >> 16) & 0xFF_FFFF, 0x12_3456);
        assert_eq!((entry >> 40) & 0xFF, 0x89);
        assert_eq!((entry >> 56) & 0xFF, 0x00);
    }

    #[test]
    fn user_selectors_request_ring_three() {
        assert_eq!(USER_CS & 3, 3);
        assert_eq!(USER_DS & 3, 3);
    }
}
