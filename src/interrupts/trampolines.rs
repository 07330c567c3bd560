//! Naked trap entry stubs.
//!
//! Every vector lands here first: the stub completes the register snapshot
//! the CPU started (segment registers, then the general purpose set),
//! switches to kernel data segments, and hands the Rust handler a pointer
//! to the assembled `TrapFrame`. Whatever the handler writes into the frame
//! (typically the syscall result in `eax`) is restored on the way out.
//!
//! Two variants exist because some exceptions push an error code and the
//! rest of the world does not; the no-error variant pushes a zero so the
//! frame layout is identical everywhere.

#[cfg(target_arch = "x86")]
macro_rules! trap_entry {
    ($name:ident, $handler:path) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                "push 0",
                "push ds",
                "push es",
                "push fs",
                "push gs",
                "pushad",
                "mov eax, {kds}",
                "mov ds, ax",
                "mov es, ax",
                "mov fs, ax",
                "mov gs, ax",
                "push esp",
                "call {handler}",
                "add esp, 4",
                "popad",
                "pop gs",
                "pop fs",
                "pop es",
                "pop ds",
                "add esp, 4",
                "iretd",
                kds = const crate::interrupts::gdt::KERNEL_DS,
                handler = sym $handler,
            );
        }
    };
}

#[cfg(target_arch = "x86")]
macro_rules! trap_entry_err {
    ($name:ident, $handler:path) => {
        #[unsafe(naked)]
        pub extern "C" fn $name() {
            core::arch::naked_asm!(
                // The CPU already pushed the error code
                "push ds",
                "push es",
                "push fs",
                "push gs",
                "pushad",
                "mov eax, {kds}",
                "mov ds, ax",
                "mov es, ax",
                "mov fs, ax",
                "mov gs, ax",
                "push esp",
                "call {handler}",
                "add esp, 4",
                "popad",
                "pop gs",
                "pop fs",
                "pop es",
                "pop ds",
                "add esp, 4",
                "iretd",
                kds = const crate::interrupts::gdt::KERNEL_DS,
                handler = sym $handler,
            );
        }
    };
}

#[cfg(not(target_arch = "x86"))]
macro_rules! trap_entry {
    ($name:ident, $handler:path) => {
        pub extern "C" fn $name() {
            let handler: extern "C" fn(&mut crate::scheduler::context::TrapFrame) = $handler;
            let _ = handler;
        }
    };
}

#[cfg(not(target_arch = "x86"))]
macro_rules! trap_entry_err {
    ($name:ident, $handler:path) => {
        pub extern "C" fn $name() {
            let handler: extern "C" fn(&mut crate::scheduler::context::TrapFrame) = $handler;
            let _ = handler;
        }
    };
}

// Processor exceptions
trap_entry!(divide_entry, crate::interrupts::exceptions::divide_error);
trap_entry!(debug_entry, crate::interrupts::exceptions::debug_trap);
trap_entry!(breakpoint_entry, crate::interrupts::exceptions::breakpoint);
trap_entry!(overflow_entry, crate::interrupts::exceptions::overflow);
trap_entry!(bound_entry, crate::interrupts::exceptions::bound_check);
trap_entry!(opcode_entry, crate::interrupts::exceptions::invalid_opcode);
trap_entry!(nofpu_entry, crate::interrupts::exceptions::no_fpu);
trap_entry_err!(segment_entry, crate::interrupts::exceptions::segment_not_present);
trap_entry_err!(stack_fault_entry, crate::interrupts::exceptions::stack_fault);
trap_entry_err!(protection_entry, crate::interrupts::exceptions::protection_fault);
trap_entry_err!(page_fault_entry, crate::interrupts::exceptions::page_fault);
trap_entry!(fpu_fault_entry, crate::interrupts::exceptions::fpu_fault);
trap_entry_err!(align_entry, crate::interrupts::exceptions::alignment_fault);
trap_entry!(simd_entry, crate::interrupts::exceptions::simd_fault);

// Hardware interrupts
trap_entry!(timer_entry, crate::drivers::timer::timer_interrupt);
trap_entry!(keyboard_entry, crate::drivers::keyboard::keyboard_interrupt);

// System calls
trap_entry!(gettid_entry, crate::syscalls::handlers::gettid);
trap_entry!(exec_entry, crate::syscalls::handlers::exec);
trap_entry!(fork_entry, crate::syscalls::handlers::fork);
trap_entry!(thread_fork_entry, crate::syscalls::handlers::thread_fork);
trap_entry!(yield_entry, crate::syscalls::handlers::yield_cpu);
trap_entry!(deschedule_entry, crate::syscalls::handlers::deschedule);
trap_entry!(make_runnable_entry, crate::syscalls::handlers::make_runnable);
trap_entry!(sleep_entry, crate::syscalls::handlers::sleep);
trap_entry!(get_ticks_entry, crate::syscalls::handlers::get_ticks);
trap_entry!(set_status_entry, crate::syscalls::handlers::set_status);
trap_entry!(wait_entry, crate::syscalls::handlers::wait);
trap_entry!(vanish_entry, crate::syscalls::handlers::vanish);
trap_entry!(new_pages_entry, crate::syscalls::handlers::new_pages);
trap_entry!(remove_pages_entry, crate::syscalls::handlers::remove_pages);
trap_entry!(getchar_entry, crate::syscalls::handlers::getchar);
trap_entry!(readline_entry, crate::syscalls::handlers::readline);
trap_entry!(print_entry, crate::syscalls::handlers::print);
trap_entry!(set_term_color_entry, crate::syscalls::handlers::set_term_color);
trap_entry!(get_cursor_pos_entry, crate::syscalls::handlers::get_cursor_pos);
trap_entry!(set_cursor_pos_entry, crate::syscalls::handlers::set_cursor_pos);
trap_entry!(halt_entry, crate::syscalls::handlers::halt);
trap_entry!(swexn_entry, crate::syscalls::handlers::swexn);
trap_entry!(readfile_entry, crate::syscalls::handlers::readfile);
