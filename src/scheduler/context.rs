//! Context switching and the kernel/user mode boundary.
//!
//! A thread's kernel context is the five callee-saved registers plus the
//! resume address; everything else lives on its kernel stack. Switching
//! stores the outgoing thread's context in its control block and resumes the
//! incoming one wherever it last saved itself: either inside
//! [`context_switch`] or, for a freshly forked thread, at [`fork_return`],
//! which finishes the parent's interrupted trap as if the child had made it.

use crate::arch;
use crate::drivers::timer;
use crate::scheduler::thread::Thread;

/// Callee-saved register context of a suspended thread.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub esp: u32,
    pub ebp: u32,
    pub ebx: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
}

impl Context {
    pub const fn empty() -> Self {
        Context { esp: 0, ebp: 0, ebx: 0, esi: 0, edi: 0, eip: 0 }
    }
}

/// The register snapshot a trap trampoline leaves on the kernel stack,
/// lowest address first. The CPU-pushed tail (`eip`..`ss`) is only complete
/// for traps that crossed from user mode.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// The trap frame of a thread that entered the kernel from user mode
    /// sits directly below the top of its kernel stack.
    pub unsafe fn on_kernel_stack(esp0: u32) -> *mut TrapFrame {
        (esp0 as usize - core::mem::size_of::<TrapFrame>()) as *mut TrapFrame
    }
}

/// Transfers the CPU from `current` to `other`.
///
/// Interrupts are disabled across the transfer. The incoming thread is
/// declared running (run-queue head, kernel stack base, page directory)
/// before its stack is adopted, and the preemption guard is dropped last so
/// a timer tick can never observe the half-updated queue.
///
/// # Safety
/// Both pointers must be live thread control blocks; `current` must be the
/// thread executing this call.
pub unsafe fn context_switch(current: *mut Thread, other: *mut Thread) {
    arch::disable_interrupts();

    crate::scheduler::set_running(other);

    if current == other {
        timer::allow_preemption();
        arch::enable_interrupts();
        return;
    }

    timer::allow_preemption();
    switch_context(&mut (*current).context, &(*other).context);

    // Execution resumes here when somebody switches back to `current`.
    arch::enable_interrupts();
}

/// Builds the kernel stack and context of a forked thread so that its first
/// scheduling lands in [`fork_return`] with a copy of the parent's trap
/// frame: the child leaves the kernel through the parent's interrupted
/// trap, with 0 in `eax`.
///
/// # Safety
/// `parent_esp0` must carry a complete user-mode trap frame and `child` a
/// freshly allocated kernel stack.
pub unsafe fn craft_child_frame(child: *mut Thread, parent_esp0: u32) {
    let parent_frame = TrapFrame::on_kernel_stack(parent_esp0);
    let child_frame = TrapFrame::on_kernel_stack((*child).esp0);

    *child_frame = *parent_frame;
    (*child_frame).eax = 0;

    (*child).context = Context::empty();
    (*child).context.esp = child_frame as u32;
    (*child).context.eip = fork_return_addr();
}

#[cfg(target_arch = "x86")]
mod imp {
    use super::Context;
    use core::arch::{asm, naked_asm};

    /// Saves the callee-saved registers and resume address into `old`, then
    /// adopts `new`'s stack and jumps to its resume address.
    ///
    /// # Safety
    /// Interrupts must be disabled; `new` must describe a suspended thread.
    #[unsafe(naked)]
    pub unsafe extern "C" fn switch_context(old: *mut Context, new: *const Context) {
        naked_asm!(
            "mov eax, [esp + 4]", // old
            "mov edx, [esp + 8]", // new
            // Save our context
            "mov [eax + 0x00], esp",
            "mov [eax + 0x04], ebp",
            "mov [eax + 0x08], ebx",
            "mov [eax + 0x0C], esi",
            "mov [eax + 0x10], edi",
            "mov ecx, offset 2f",
            "mov [eax + 0x14], ecx",
            // Adopt the new one
            "mov esp, [edx + 0x00]",
            "mov ebp, [edx + 0x04]",
            "mov ebx, [edx + 0x08]",
            "mov esi, [edx + 0x0C]",
            "mov edi, [edx + 0x10]",
            "jmp dword ptr [edx + 0x14]",
            // Where we continue when switched back in
            "2:",
            "ret",
        );
    }

    /// First instruction a forked thread ever runs: unwind the copied trap
    /// frame and return to user mode.
    #[unsafe(naked)]
    pub unsafe extern "C" fn fork_return() {
        naked_asm!(
            "popad",
            "pop gs",
            "pop fs",
            "pop es",
            "pop ds",
            "add esp, 4", // error code slot
            "iretd",
        );
    }

    pub fn fork_return_addr() -> u32 {
        fork_return as *const () as u32
    }

    /// Enters user mode at `entry` with the stack `esp3`, as if returning
    /// from a trap that never happened.
    pub unsafe fn launch(entry: u32, esp3: u32) -> ! {
        asm!(
            "cli",
            "mov ds, {seg:x}",
            "mov es, {seg:x}",
            "mov fs, {seg:x}",
            "mov gs, {seg:x}",
            "push {seg}",     // ss
            "push {esp3}",    // esp
            "push {eflags}",  // eflags with IF set
            "push {cs}",      // cs
            "push {entry}",   // eip
            "iretd",
            seg = in(reg) crate::interrupts::gdt::USER_DS as u32,
            cs = in(reg) crate::interrupts::gdt::USER_CS as u32,
            esp3 = in(reg) esp3,
            eflags = in(reg) 0x202u32,
            entry = in(reg) entry,
            options(noreturn),
        );
    }
}

#[cfg(not(target_arch = "x86"))]
mod imp {
    use super::Context;

    pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
        unreachable!("context switch on a non-x86 host");
    }

    pub fn fork_return_addr() -> u32 {
        0
    }

    pub unsafe fn launch(_entry: u32, _esp3: u32) -> ! {
        unreachable!("mode switch on a non-x86 host");
    }
}

pub use imp::{launch, switch_context};
use imp::fork_return_addr;
