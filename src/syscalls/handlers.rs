//! Trap-frame adapters: unpack the argument register, call the real
//! implementation, put the result back in `eax`.
//!
//! The convention is the one the trampolines preserve: `esi` carries either
//! the single argument or a user pointer to a packed argument array, and
//! the value left in the frame's `eax` is what the thread sees after the
//! trap returns.

use crate::errors::{syscall_return, KernelError, KernelResult};
use crate::scheduler::context::TrapFrame;
use crate::syscalls::{check, console, lifecycle, management, misc, paging};

fn packed<const N: usize>(tf: &TrapFrame) -> KernelResult<[u32; N]> {
    check::read_args::<N>(tf.esi).ok_or(KernelError::InvalidArg)
}

pub extern "C" fn gettid(tf: &mut TrapFrame) {
    tf.eax = management::gettid() as u32;
}

pub extern "C" fn fork(tf: &mut TrapFrame) {
    tf.eax = syscall_return(lifecycle::fork()) as u32;
}

pub extern "C" fn thread_fork(tf: &mut TrapFrame) {
    tf.eax = syscall_return(lifecycle::thread_fork()) as u32;
}

pub extern "C" fn exec(tf: &mut TrapFrame) {
    let result = packed::<2>(tf).and_then(|[name_ptr, argv_ptr]| {
        let name = check::copy_string(name_ptr).ok_or(KernelError::InvalidArg)?;
        let args = if argv_ptr == 0 {
            alloc::vec::Vec::new()
        } else {
            check::copy_string_array(argv_ptr)?
        };
        lifecycle::exec(name, args)
    });
    // Only failures come back
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn yield_cpu(tf: &mut TrapFrame) {
    tf.eax = syscall_return(management::yield_to(tf.esi as i32)) as u32;
}

pub extern "C" fn deschedule(tf: &mut TrapFrame) {
    let flag = tf.esi;
    let result = if check::check_page(flag, false) {
        unsafe { management::deschedule(flag as *const i32) }
    } else {
        Err(KernelError::InvalidArg)
    };
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn make_runnable(tf: &mut TrapFrame) {
    tf.eax = syscall_return(management::make_runnable(tf.esi as i32)) as u32;
}

pub extern "C" fn sleep(tf: &mut TrapFrame) {
    tf.eax = syscall_return(management::sleep(tf.esi as i32)) as u32;
}

pub extern "C" fn get_ticks(tf: &mut TrapFrame) {
    tf.eax = management::get_ticks();
}

pub extern "C" fn set_status(tf: &mut TrapFrame) {
    lifecycle::set_status(tf.esi as i32);
}

pub extern "C" fn wait(tf: &mut TrapFrame) {
    let status_ptr = tf.esi;
    let result = if status_ptr == 0 || check::check_page(status_ptr, true) {
        unsafe { lifecycle::wait(status_ptr) }
    } else {
        Err(KernelError::InvalidArg)
    };
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn vanish(_tf: &mut TrapFrame) {
    lifecycle::vanish();
}

pub extern "C" fn new_pages(tf: &mut TrapFrame) {
    let result =
        packed::<2>(tf).and_then(|[base, len]| paging::new_pages(base, len as i32));
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn remove_pages(tf: &mut TrapFrame) {
    tf.eax = syscall_return(paging::remove_pages(tf.esi)) as u32;
}

pub extern "C" fn getchar(tf: &mut TrapFrame) {
    tf.eax = syscall_return(console::getchar()) as u32;
}

pub extern "C" fn readline(tf: &mut TrapFrame) {
    let result =
        packed::<2>(tf).and_then(|[size, buf]| console::readline(size as i32, buf));
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn print(tf: &mut TrapFrame) {
    let result = packed::<2>(tf).and_then(|[size, buf]| console::print(size as i32, buf));
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn set_term_color(tf: &mut TrapFrame) {
    tf.eax = syscall_return(console::set_term_color(tf.esi as i32)) as u32;
}

pub extern "C" fn get_cursor_pos(tf: &mut TrapFrame) {
    let result = packed::<2>(tf)
        .and_then(|[row_ptr, col_ptr]| console::get_cursor_pos(row_ptr, col_ptr));
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn set_cursor_pos(tf: &mut TrapFrame) {
    let result = packed::<2>(tf)
        .and_then(|[row, col]| console::set_cursor_pos(row as i32, col as i32));
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn halt(_tf: &mut TrapFrame) {
    misc::halt();
}

pub extern "C" fn swexn(tf: &mut TrapFrame) {
    let result = packed::<4>(tf).and_then(|[esp3, eip, arg, newureg]| {
        management::swexn(tf, esp3, eip, arg, newureg)
    });
    tf.eax = syscall_return(result) as u32;
}

pub extern "C" fn readfile(tf: &mut TrapFrame) {
    let result = packed::<4>(tf).and_then(|[name, buf, count, offset]| {
        misc::readfile(name, buf, count as i32, offset as i32)
    });
    tf.eax = syscall_return(result) as u32;
}
