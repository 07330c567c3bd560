//! The system call surface.
//!
//! Every call has its own trap gate, reachable from user privilege. The
//! naked entry stubs live in [`crate::interrupts::trampolines`]; the
//! trap-frame adapters in [`handlers`]; the implementations in the sibling
//! modules.

pub mod check;
pub mod console;
pub mod handlers;
pub mod lifecycle;
pub mod management;
pub mod misc;
pub mod paging;

use crate::interrupts::gdt::KERNEL_CS;
use crate::interrupts::idt::{self, TrapGate};
use crate::interrupts::trampolines;

pub const GETTID_INT: usize = 0x40;
pub const FORK_INT: usize = 0x41;
pub const EXEC_INT: usize = 0x42;
pub const WAIT_INT: usize = 0x43;
pub const YIELD_INT: usize = 0x44;
pub const DESCHEDULE_INT: usize = 0x45;
pub const MAKE_RUNNABLE_INT: usize = 0x46;
pub const SLEEP_INT: usize = 0x47;
pub const GET_TICKS_INT: usize = 0x48;
pub const SET_STATUS_INT: usize = 0x49;
pub const VANISH_INT: usize = 0x4A;
pub const NEW_PAGES_INT: usize = 0x4B;
pub const REMOVE_PAGES_INT: usize = 0x4C;
pub const GETCHAR_INT: usize = 0x4D;
pub const READLINE_INT: usize = 0x4E;
pub const PRINT_INT: usize = 0x4F;
pub const SET_TERM_COLOR_INT: usize = 0x50;
pub const GET_CURSOR_POS_INT: usize = 0x51;
pub const SET_CURSOR_POS_INT: usize = 0x52;
pub const HALT_INT: usize = 0x53;
pub const SWEXN_INT: usize = 0x54;
pub const THREAD_FORK_INT: usize = 0x55;
pub const READFILE_INT: usize = 0x56;

/// Installs one user-reachable trap gate per system call.
pub fn install() {
    let mut gate = TrapGate {
        segment: KERNEL_CS,
        offset: 0,
        privilege_level: 3,
    };

    let entries: [(usize, extern "C" fn()); 23] = [
        (GETTID_INT, trampolines::gettid_entry),
        (FORK_INT, trampolines::fork_entry),
        (EXEC_INT, trampolines::exec_entry),
        (WAIT_INT, trampolines::wait_entry),
        (YIELD_INT, trampolines::yield_entry),
        (DESCHEDULE_INT, trampolines::deschedule_entry),
        (MAKE_RUNNABLE_INT, trampolines::make_runnable_entry),
        (SLEEP_INT, trampolines::sleep_entry),
        (GET_TICKS_INT, trampolines::get_ticks_entry),
        (SET_STATUS_INT, trampolines::set_status_entry),
        (VANISH_INT, trampolines::vanish_entry),
        (NEW_PAGES_INT, trampolines::new_pages_entry),
        (REMOVE_PAGES_INT, trampolines::remove_pages_entry),
        (GETCHAR_INT, trampolines::getchar_entry),
        (READLINE_INT, trampolines::readline_entry),
        (PRINT_INT, trampolines::print_entry),
        (SET_TERM_COLOR_INT, trampolines::set_term_color_entry),
        (SET_CURSOR_POS_INT, trampolines::set_cursor_pos_entry),
        (GET_CURSOR_POS_INT, trampolines::get_cursor_pos_entry),
        (HALT_INT, trampolines::halt_entry),
        (SWEXN_INT, trampolines::swexn_entry),
        (THREAD_FORK_INT, trampolines::thread_fork_entry),
        (READFILE_INT, trampolines::readfile_entry),
    ];

    for (vector, entry) in entries {
        gate.offset = entry as u32;
        idt::insert(idt::trap_gate_entry(&gate), vector);
    }

    crate::log_info!("System call gates installed.");
}
