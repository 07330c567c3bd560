//! Process and thread lifecycle: fork, thread_fork, exec, set_status, wait
//! and vanish.

use alloc::string::String;
use alloc::vec::Vec;

use crate::drivers::timer;
use crate::errors::{KernelError, KernelResult};
use crate::kernel_panic;
use crate::loader::{archive, elf};
use crate::memory::{page, page_align_down, MemType, PAGE_SIZE};
use crate::scheduler;
use crate::scheduler::context;
use crate::scheduler::process;
use crate::scheduler::thread;

/// Duplicates the calling task. The child inherits a copy-on-write image
/// of the address space and a hand-crafted kernel stack that makes it leave
/// the kernel through the parent's interrupted trap with a 0 result; the
/// parent gets the child's tid.
///
/// Only single-threaded tasks may fork.
pub fn fork() -> KernelResult<i32> {
    let me = scheduler::get_self();

    unsafe {
        if (*(*me).process).threads > 1 {
            return Err(KernelError::MultipleThreads);
        }

        let child_proc = process::copy_process((*me).process)?;

        let child = match thread::copy_thread(child_proc, me, true) {
            Ok(child) => child,
            Err(_) => {
                process::discard_process(child_proc);
                return Err(KernelError::CopyThreadFail);
            }
        };

        context::craft_child_frame(child, (*me).esp0);

        if let Err(err) = scheduler::set_runnable(child) {
            process::discard_process(child_proc);
            return Err(err);
        }

        Ok((*child).tid as i32)
    }
}

/// Adds a thread to the calling task, fork-style: the new thread returns to
/// user mode through a copy of the caller's trap frame with a 0 result.
pub fn thread_fork() -> KernelResult<i32> {
    let me = scheduler::get_self();

    unsafe {
        let process = (*me).process;
        if process.is_null() {
            return Err(KernelError::NoProcess);
        }

        let new = thread::copy_thread(process, me, false)
            .map_err(|_| KernelError::CopyThreadFail)?;

        context::craft_child_frame(new, (*me).esp0);

        if let Err(err) = scheduler::set_runnable(new) {
            let _ = thread::destroy_thread(new);
            return Err(err);
        }

        Ok((*new).tid as i32)
    }
}

/// Records the exit status a future `wait` will report for this task.
pub fn set_status(status: i32) {
    let me = scheduler::get_self();
    unsafe {
        let process = (*me).process;
        if process.is_null() {
            kernel_panic!("thread {} has no process to report to", (*me).tid);
        }
        (*process).exit_status = status;
    }
}

/// Replaces the calling task's user address space with the named archive
/// program and jumps into it. Returns only on failure; past the address
/// space reset there is no way back and load errors kill the thread via
/// the fault path.
pub fn exec(execname: String, args: Vec<String>) -> KernelResult<i32> {
    let is_idle = execname == "idle";
    let is_init = execname == "init";

    let entry = archive::archive()
        .entry(&execname)
        .ok_or(KernelError::ElfInvalid)?;
    elf::check_header(entry.bytes)?;
    let image = elf::load(entry.bytes)?;

    let me = scheduler::get_self();

    // Point of no return: the old user space goes away
    page::reset_user_space();

    // Argument strings live in read-only pages above the user stack
    let total_arg_len: usize = args.iter().map(|a| a.len() + 1).sum();
    let num_arg_pages = total_arg_len.div_ceil(PAGE_SIZE);

    let mut va = page_align_down(u32::MAX);
    for i in 0..num_arg_pages {
        if i > 0 {
            va -= PAGE_SIZE as u32;
        }
        page::create_page(va, MemType::RoData, None)
            .map_err(|_| KernelError::SaveArgsFail)?;
    }
    let argzone_bottom = va;

    // The stack starts one word below the argument zone
    let esp3 = argzone_bottom - 4;
    page::create_page(page_align_down(esp3), MemType::Stack, None)
        .map_err(|_| KernelError::CreateUserStackFail)?;

    unsafe {
        // Copy the strings out and remember where each one landed
        let mut arg_ptrs = Vec::with_capacity(args.len());
        let mut cursor = argzone_bottom;
        for arg in &args {
            core::ptr::copy_nonoverlapping(arg.as_ptr(), cursor as *mut u8, arg.len());
            *((cursor + arg.len() as u32) as *mut u8) = 0;
            arg_ptrs.push(cursor);
            cursor += arg.len() as u32 + 1;
        }

        // argv[] sits at the very top of the stack, then the startup frame:
        // fake return address, argc, argv, stack_high, stack_low
        let argc = args.len() as u32;
        let argv_base = esp3 - 4 * argc.saturating_sub(1);
        for (i, ptr) in arg_ptrs.iter().enumerate() {
            *((argv_base + 4 * i as u32) as *mut u32) = *ptr;
        }

        let argbase = esp3 - 4 * argc - 16;
        *(argbase as *mut u32) = 0;
        *((argbase + 4) as *mut u32) = argc;
        *((argbase + 8) as *mut u32) = argv_base;
        *((argbase + 12) as *mut u32) = esp3;
        *((argbase + 16) as *mut u32) = page_align_down(esp3);
        (*me).esp3 = argbase;

        // Map and fill the segments straight from the archive image
        for seg in &image.segments {
            let mut copied = 0u32;
            while copied < seg.file_len {
                let addr = seg.start + copied;
                let page_base = page_align_down(addr);
                let space =
                    (page_base + PAGE_SIZE as u32 - addr).min(seg.file_len - copied);

                match page::create_page(page_base, seg.mem_type, None) {
                    Ok(()) | Err(KernelError::PageAlreadyPresent) => {}
                    Err(_) => return Err(KernelError::SegmentPageFail),
                }

                core::ptr::copy_nonoverlapping(
                    entry.bytes.as_ptr().add((seg.file_off + copied) as usize),
                    addr as *mut u8,
                    space as usize,
                );
                copied += space;
            }
        }

        // Bss: fresh pages share the zero frame, a tail that overlaps the
        // data segment's last page is cleared by hand
        if let Some((start, len)) = image.bss {
            let mut covered = 0u32;
            while covered < len {
                let addr = start + covered;
                let page_base = page_align_down(addr);
                let space = (page_base + PAGE_SIZE as u32 - addr).min(len - covered);

                match page::create_page(page_base, MemType::Bss, None) {
                    Ok(()) => {}
                    Err(KernelError::PageAlreadyPresent) => {
                        core::ptr::write_bytes(addr as *mut u8, 0, space as usize);
                    }
                    Err(_) => return Err(KernelError::SegmentPageFail),
                }
                covered += space;
            }
        }

        if is_idle && scheduler::set_idle(me).is_err() {
            kernel_panic!("no idle thread");
        }
        if is_init && scheduler::set_init(me).is_err() {
            kernel_panic!("no init thread");
        }

        context::launch(image.entry, (*me).esp3);
    }
}

/// Reaps an exited child: returns its original thread's tid and, through
/// `status_out`, its exit status. Blocks on the task's waiter queue while
/// children are alive but none has exited yet.
///
/// # Safety
/// `status_out`, when nonzero, must be a validated writable user address.
pub unsafe fn wait(status_out: u32) -> KernelResult<i32> {
    let me = scheduler::get_self();
    let task = (*me).process;

    if (*task).children == 0 {
        return Err(KernelError::NoChildren);
    }
    // More waiters than children cannot all be served
    if ((*task).children as usize) <= (*task).waiting.len {
        return Err(KernelError::WaitFull);
    }

    let mut child;
    loop {
        child = process::exited_child(task);
        if !child.is_null() || (*task).children == 0 {
            break;
        }

        timer::disable_preemption();
        if let Err(err) = scheduler::set_waiting(me) {
            timer::allow_preemption();
            return Err(err);
        }

        let mut other = scheduler::get_running();
        if other.is_null() {
            other = scheduler::idle_thread();
        }
        context::context_switch(me, other);
    }

    if child.is_null() {
        return Err(KernelError::ChildrenGone);
    }

    if status_out != 0 {
        *(status_out as *mut i32) = (*child).exit_status;
    }

    let original_tid = (*child).original_tid.ok_or(KernelError::NoOriginalThread)?;
    process::destroy_process(child)?;

    Ok(original_tid as i32)
}

/// Terminates the calling thread for good. The last thread out also retires
/// the whole task: children are handed to init, the exit status becomes
/// collectible, and one waiting parent thread is woken to collect it.
pub fn vanish() -> ! {
    unsafe {
        let me = scheduler::get_self();

        timer::disable_preemption();

        if let Err(err) = thread::vanish_thread() {
            kernel_panic!("thread {} failed to vanish: {:?}", (*me).tid, err);
        }

        let mut other = scheduler::get_running();
        if other.is_null() {
            other = scheduler::idle_thread();
        }

        let task = (*me).process;
        if (*task).threads == 0 {
            if let Err(err) = process::vanish_process(task) {
                kernel_panic!("task {} failed to exit: {:?}", (*task).pid, err);
            }

            if !(*task).parent.is_null() {
                let waiting = scheduler::get_waiting((*task).parent);
                if !waiting.is_null() {
                    if scheduler::set_runnable(waiting).is_err() {
                        kernel_panic!("waiter {} cannot be woken", (*waiting).tid);
                    }
                    other = waiting;
                }
            }
        }

        context::context_switch(me, other);
        kernel_panic!("a vanished thread came back");
    }
}
