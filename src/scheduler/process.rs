//! Process control blocks: address space root, user memory-region tracking,
//! the parent/child/sibling family graph and exit-status plumbing.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;

use crate::errors::{KernelError, KernelResult};
use crate::kernel_panic;
use crate::memory::page::{self, PageTable};
use crate::memory::regions::MemRegions;
use crate::memory::MemType;
use crate::scheduler::thread::Thread;
use crate::scheduler::thrlist::ThreadList;

pub const INITIAL_PID: u32 = 1;

static NEXT_PID: AtomicU32 = AtomicU32::new(INITIAL_PID);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited,
    Buried,
}

pub struct Process {
    pub pid: u32,
    pub exit_status: i32,
    pub state: ProcessState,

    /// Root of this process's page-table tree.
    pub cr3: *mut PageTable,

    /// Regions handed out by new_pages, for remove_pages to undo.
    pub memregions: MemRegions,

    /// Family graph. All edges are non-owning and nulled on unlink.
    pub parent: *mut Process,
    pub youngest_child: *mut Process,
    pub older_sibling: *mut Process,
    pub younger_sibling: *mut Process,
    pub children: u32,

    /// Threads of this process, youngest first, plus the tid `wait`
    /// reports for the whole task.
    pub youngest_thread: *mut Thread,
    pub original_tid: Option<u32>,

    /// Threads that have not vanished yet.
    pub threads: u32,

    /// Threads of this process currently blocked in `wait`.
    pub waiting: ThreadList,
}

pub fn next_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Allocates a process with a fresh page directory (kernel mappings shared,
/// user space empty), an empty memregion table and no family.
pub fn create_process() -> KernelResult<*mut Process> {
    let cr3 = page::init_directory()?;

    let process = Box::new(Process {
        pid: next_pid(),
        exit_status: -1,
        state: ProcessState::Running,
        cr3,
        memregions: MemRegions::new(),
        parent: core::ptr::null_mut(),
        youngest_child: core::ptr::null_mut(),
        older_sibling: core::ptr::null_mut(),
        younger_sibling: core::ptr::null_mut(),
        children: 0,
        youngest_thread: core::ptr::null_mut(),
        original_tid: None,
        threads: 0,
        waiting: ThreadList::new(),
    });

    Ok(Box::into_raw(process))
}

/// Creates the very first process. Unlike everything after it, the first
/// process cannot inherit a user stack through fork, so one page is mapped
/// at the top of the address space before it execs.
pub fn create_first_process() -> KernelResult<*mut Process> {
    let process = create_process()?;

    unsafe {
        page::activate((*process).cr3);
    }

    let stack_page = 0xFFFF_FFFCu32 & !(crate::memory::PAGE_SIZE as u32 - 1);
    if let Err(err) = page::create_page(stack_page, MemType::Stack, None) {
        unsafe {
            let _ = destroy_exited(process, true);
        }
        return Err(err);
    }

    Ok(process)
}

/// Duplicates `parent` for fork: fresh control block, copy-on-write image
/// of the whole user address space, linked in as the youngest child.
///
/// # Safety
/// `parent` must be the live process of the calling thread.
pub unsafe fn copy_process(parent: *mut Process) -> KernelResult<*mut Process> {
    if parent.is_null() {
        return Err(KernelError::ArgNull);
    }

    let process = create_process()?;

    if let Err(err) = page::copy_paging((*parent).cr3, (*process).cr3) {
        let _ = destroy_exited(process, true);
        return Err(err);
    }

    (*process).parent = parent;
    if !(*parent).youngest_child.is_null() {
        (*(*parent).youngest_child).younger_sibling = process;
        (*process).older_sibling = (*parent).youngest_child;
    }
    (*parent).youngest_child = process;
    (*parent).children += 1;

    Ok(process)
}

/// Finds a child of `parent` that has exited, youngest first.
///
/// # Safety
/// `parent` must be live; the family graph must not be mutated concurrently.
pub unsafe fn exited_child(parent: *mut Process) -> *mut Process {
    if parent.is_null() || (*parent).children == 0 {
        return core::ptr::null_mut();
    }

    let mut child = (*parent).youngest_child;
    while !child.is_null() && (*child).state != ProcessState::Exited {
        child = (*child).older_sibling;
    }

    child
}

/// Marks a process whose last thread just vanished as Exited and hands any
/// surviving children over to init.
///
/// # Safety
/// Must run with preemption suppressed, on behalf of the exiting thread.
pub unsafe fn vanish_process(process: *mut Process) -> KernelResult<()> {
    if process.is_null() {
        return Err(KernelError::ArgNull);
    }
    if (*process).threads > 0 {
        return Err(KernelError::ActiveThreads);
    }

    if (*process).children > 0 {
        let init = crate::scheduler::init_thread();
        if init.is_null() {
            kernel_panic!("orphaned children but no init task");
        }
        let init_task = (*init).process;

        (*init_task).children += (*process).children;

        // Reparent the whole chain, then splice it in front of init's own
        // children so init's youngest_child points at ours.
        let mut last = core::ptr::null_mut();
        let mut current = (*process).youngest_child;
        while !current.is_null() {
            (*current).parent = init_task;
            last = current;
            current = (*current).older_sibling;
        }

        (*last).older_sibling = (*init_task).youngest_child;
        if !(*init_task).youngest_child.is_null() {
            (*(*init_task).youngest_child).younger_sibling = last;
        }
        (*init_task).youngest_child = (*process).youngest_child;
        (*process).youngest_child = core::ptr::null_mut();
        (*process).children = 0;
    }

    (*process).state = ProcessState::Exited;
    Ok(())
}

/// Reaps an Exited process: destroys its remaining zombie threads, tears
/// down its user paging, unlinks it from the family graph and frees the
/// control block. Called from a waiting thread of the parent.
///
/// # Safety
/// `process` must be Exited and no longer referenced by any running thread.
pub unsafe fn destroy_process(process: *mut Process) -> KernelResult<()> {
    destroy_exited(process, false)
}

/// Abort-path teardown for a process that never got to run.
///
/// # Safety
/// No thread of `process` may ever have been scheduled.
pub unsafe fn discard_process(process: *mut Process) {
    let _ = destroy_exited(process, true);
}

unsafe fn destroy_exited(process: *mut Process, partial: bool) -> KernelResult<()> {
    if process.is_null() {
        return Err(KernelError::ArgNull);
    }
    if !partial && (*process).state != ProcessState::Exited {
        return Err(KernelError::ProcessNotExited);
    }
    (*process).state = ProcessState::Buried;

    while !(*process).youngest_thread.is_null() {
        crate::scheduler::thread::destroy_thread((*process).youngest_thread)?;
    }

    // Unlink from the sibling chain
    let older = (*process).older_sibling;
    let younger = (*process).younger_sibling;
    if !older.is_null() {
        (*older).younger_sibling = younger;
    }
    if !younger.is_null() {
        (*younger).older_sibling = older;
    } else if !(*process).parent.is_null() {
        (*(*process).parent).youngest_child = older;
    }
    if !(*process).parent.is_null() {
        (*(*process).parent).children -= 1;
    }

    page::destroy_paging((*process).cr3)?;

    (*process).waiting.clear();
    drop(Box::from_raw(process));
    Ok(())
}
