//! Processor exception handling.
//!
//! All exceptions funnel into one policy: a user-mode fault is offered to
//! the thread's registered software exception handler; without one the
//! thread dies with a diagnostic. A kernel-mode fault means the kernel
//! itself is broken and the machine halts. Page faults come through here
//! only after the zero-fill and copy-on-write paths have declined them.

use crate::interrupts::gdt::KERNEL_CS;
use crate::interrupts::idt::{self, TrapGate};
use crate::interrupts::trampolines;
use crate::scheduler;
use crate::scheduler::context::{self, TrapFrame};
use crate::syscalls::check;
use crate::{kernel_panic, thread_panic};

// Cause codes delivered to software exception handlers; identical to the
// processor vector numbers.
pub const CAUSE_DIVIDE: u32 = 0x00;
pub const CAUSE_DEBUG: u32 = 0x01;
pub const CAUSE_BREAKPOINT: u32 = 0x03;
pub const CAUSE_OVERFLOW: u32 = 0x04;
pub const CAUSE_BOUNDCHECK: u32 = 0x05;
pub const CAUSE_OPCODE: u32 = 0x06;
pub const CAUSE_NOFPU: u32 = 0x07;
pub const CAUSE_SEGFAULT: u32 = 0x0B;
pub const CAUSE_STACKFAULT: u32 = 0x0C;
pub const CAUSE_PROTFAULT: u32 = 0x0D;
pub const CAUSE_PAGEFAULT: u32 = 0x0E;
pub const CAUSE_FPUFAULT: u32 = 0x10;
pub const CAUSE_ALIGNFAULT: u32 = 0x11;
pub const CAUSE_SIMDFAULT: u32 = 0x13;

/// The register snapshot handed to a software exception handler.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UReg {
    pub cause: u32,
    pub cr2: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub zero: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl UReg {
    pub fn from_trap(cause: u32, cr2: u32, tf: &TrapFrame) -> UReg {
        UReg {
            cause,
            cr2,
            ds: tf.ds,
            es: tf.es,
            fs: tf.fs,
            gs: tf.gs,
            edi: tf.edi,
            esi: tf.esi,
            ebp: tf.ebp,
            zero: 0,
            ebx: tf.ebx,
            edx: tf.edx,
            ecx: tf.ecx,
            eax: tf.eax,
            error_code: tf.error_code,
            eip: tf.eip,
            cs: tf.cs,
            eflags: tf.eflags,
            esp: tf.esp,
            ss: tf.ss,
        }
    }
}

pub fn install() {
    let mut gate = TrapGate {
        segment: KERNEL_CS,
        offset: 0,
        privilege_level: 0,
    };

    let entries: [(usize, extern "C" fn()); 14] = [
        (idt::IDT_DE, trampolines::divide_entry),
        (idt::IDT_DB, trampolines::debug_entry),
        (idt::IDT_BP, trampolines::breakpoint_entry),
        (idt::IDT_OF, trampolines::overflow_entry),
        (idt::IDT_BR, trampolines::bound_entry),
        (idt::IDT_UD, trampolines::opcode_entry),
        (idt::IDT_NM, trampolines::nofpu_entry),
        (idt::IDT_NP, trampolines::segment_entry),
        (idt::IDT_SS, trampolines::stack_fault_entry),
        (idt::IDT_GP, trampolines::protection_entry),
        (idt::IDT_PF, trampolines::page_fault_entry),
        (idt::IDT_MF, trampolines::fpu_fault_entry),
        (idt::IDT_AC, trampolines::align_entry),
        (idt::IDT_XF, trampolines::simd_entry),
    ];

    for (vector, entry) in entries {
        gate.offset = entry as u32;
        idt::insert(idt::trap_gate_entry(&gate), vector);
    }
}

fn came_from_user(tf: &TrapFrame) -> bool {
    tf.cs & 0x3 == 0x3
}

/// Tries to hand the fault to the thread's registered handler. Returns only
/// if there is no handler or its exception stack is unusable; a successful
/// delivery leaves the kernel through the mode-switch trampoline.
///
/// Registration is consumed: the handler must re-register from inside if it
/// wants to catch the next fault.
fn try_swexn(cause: u32, cr2: u32, tf: &mut TrapFrame) {
    let me = scheduler::get_self();

    let handler = match unsafe { (*me).swexn.take() } {
        Some(handler) => handler,
        None => return,
    };

    let ureg_size = core::mem::size_of::<UReg>() as u32;
    // The handler stack gets the register snapshot plus a fake call frame:
    // return address, the opaque argument and the snapshot pointer.
    let needed = ureg_size + 3 * 4;
    let base = handler.esp3.wrapping_sub(needed);
    if !check::check_buffer(base, needed as usize, true) {
        return;
    }

    unsafe {
        let ureg = (handler.esp3 - ureg_size) as *mut UReg;
        *ureg = UReg::from_trap(cause, cr2, tf);

        let argbase = (handler.esp3 - ureg_size - 2 * 4) as *mut u32;
        *argbase.offset(-1) = 0; // fake return address
        *argbase = handler.arg;
        *argbase.offset(1) = ureg as u32;

        context::launch(handler.eip, argbase.offset(-1) as u32);
    }
}

fn exception(cause: u32, name: &str, tf: &mut TrapFrame) {
    if came_from_user(tf) {
        try_swexn(cause, 0, tf);
        let tid = unsafe { (*scheduler::get_self()).tid };
        thread_panic!("Exception in thread {}: {}", tid, name);
    }

    kernel_panic!(
        "kernel {} at {:#010x} (error code {:#x})",
        name,
        tf.eip,
        tf.error_code
    );
}

/// Terminal page-fault path, reached when neither zero-fill nor
/// copy-on-write could satisfy the access.
pub fn deliver_page_fault(addr: u32, tf: &mut TrapFrame) {
    if came_from_user(tf) {
        try_swexn(CAUSE_PAGEFAULT, addr, tf);
        let tid = unsafe { (*scheduler::get_self()).tid };
        thread_panic!("Exception in thread {}: page fault at {:#010x}", tid, addr);
    }

    kernel_panic!(
        "kernel page fault at {:#010x} (eip {:#010x}, error code {:#x})",
        addr,
        tf.eip,
        tf.error_code
    );
}

pub extern "C" fn divide_error(tf: &mut TrapFrame) {
    exception(CAUSE_DIVIDE, "divide by zero", tf);
}

pub extern "C" fn debug_trap(tf: &mut TrapFrame) {
    exception(CAUSE_DEBUG, "debug exception", tf);
}

pub extern "C" fn breakpoint(tf: &mut TrapFrame) {
    exception(CAUSE_BREAKPOINT, "breakpoint", tf);
}

pub extern "C" fn overflow(tf: &mut TrapFrame) {
    exception(CAUSE_OVERFLOW, "overflow exception", tf);
}

pub extern "C" fn bound_check(tf: &mut TrapFrame) {
    exception(CAUSE_BOUNDCHECK, "bound check exception", tf);
}

pub extern "C" fn invalid_opcode(tf: &mut TrapFrame) {
    exception(CAUSE_OPCODE, "bad opcode", tf);
}

pub extern "C" fn no_fpu(tf: &mut TrapFrame) {
    exception(CAUSE_NOFPU, "no FPU present", tf);
}

pub extern "C" fn segment_not_present(tf: &mut TrapFrame) {
    exception(CAUSE_SEGFAULT, "segmentation fault", tf);
}

pub extern "C" fn stack_fault(tf: &mut TrapFrame) {
    exception(CAUSE_STACKFAULT, "stack fault", tf);
}

pub extern "C" fn protection_fault(tf: &mut TrapFrame) {
    exception(CAUSE_PROTFAULT, "protection fault", tf);
}

pub extern "C" fn page_fault(tf: &mut TrapFrame) {
    crate::memory::page::page_fault_handler(tf);
}

pub extern "C" fn fpu_fault(tf: &mut TrapFrame) {
    exception(CAUSE_FPUFAULT, "FPU fault", tf);
}

pub extern "C" fn alignment_fault(tf: &mut TrapFrame) {
    exception(CAUSE_ALIGNFAULT, "alignment fault", tf);
}

pub extern "C" fn simd_fault(tf: &mut TrapFrame) {
    exception(CAUSE_SIMDFAULT, "SIMD fault", tf);
}
