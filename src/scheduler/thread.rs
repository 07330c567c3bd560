//! Thread control blocks and their lifecycle.
//!
//! Threads are heap records referenced everywhere by raw pointer. The global
//! tid hash logically owns a thread from `create_thread` until
//! `destroy_thread`; the scheduler lists, the per-process sibling chain and
//! the lock wait chains all thread through the record itself, so a thread is
//! never in more than one scheduler list at a time.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;

use crate::allocator;
use crate::errors::{KernelError, KernelResult};
use crate::memory::PAGE_SIZE;
use crate::scheduler::context::Context;
use crate::scheduler::process::Process;
use crate::scheduler::thrlist::ThreadList;
use crate::sync::Mutex;

/// First tid ever handed out.
pub const INITIAL_TID: u32 = 32;

/// Kernel stacks are two pages.
pub const KERNEL_STACK_PAGES: usize = 2;
pub const KERNEL_STACK_SIZE: usize = KERNEL_STACK_PAGES * PAGE_SIZE;

static NEXT_TID: AtomicU32 = AtomicU32::new(INITIAL_TID);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Blocked,
    Sleeping,
    Waiting,
    Zombie,
}

/// A registered software exception handler.
#[derive(Debug, Clone, Copy)]
pub struct SwexnHandler {
    pub esp3: u32,
    pub eip: u32,
    pub arg: u32,
}

pub struct Thread {
    pub tid: u32,
    pub state: ThreadState,

    /// Saved kernel context; only meaningful while suspended.
    pub context: Context,

    /// Kernel stack allocation base and its exclusive top.
    pub kstack: *mut u8,
    pub esp0: u32,

    /// Last known user stack pointer.
    pub esp3: u32,

    pub process: *mut Process,

    /// Scheduler-list membership (at most one list at a time).
    pub list: *mut ThreadList,
    pub prev: *mut Thread,
    pub next: *mut Thread,

    /// Global tid-hash chain.
    pub hash_prev: *mut Thread,
    pub hash_next: *mut Thread,

    /// Sibling chain inside the owning process.
    pub older_sibling: *mut Thread,
    pub younger_sibling: *mut Thread,

    /// Tick at which a sleeping thread becomes runnable again.
    pub wake: u32,

    pub swexn: Option<SwexnHandler>,

    /// Serializes deschedule against make_runnable on this thread.
    pub thread_lock: Mutex,

    /// Top of the stack of mutexes this thread currently holds.
    pub acquired_lock: *const Mutex,

    /// Wait-chain links used by the kernel mutex and condvar.
    pub mutex_nextwait: *mut Thread,
    pub cond_nextwait: *mut Thread,
}

impl Thread {
    fn blank(tid: u32) -> Thread {
        Thread {
            tid,
            state: ThreadState::Zombie,
            context: Context::empty(),
            kstack: core::ptr::null_mut(),
            esp0: 0,
            esp3: 0xFFFF_FFFC,
            process: core::ptr::null_mut(),
            list: core::ptr::null_mut(),
            prev: core::ptr::null_mut(),
            next: core::ptr::null_mut(),
            hash_prev: core::ptr::null_mut(),
            hash_next: core::ptr::null_mut(),
            older_sibling: core::ptr::null_mut(),
            younger_sibling: core::ptr::null_mut(),
            wake: 0,
            swexn: None,
            thread_lock: Mutex::new(),
            acquired_lock: core::ptr::null(),
            mutex_nextwait: core::ptr::null_mut(),
            cond_nextwait: core::ptr::null_mut(),
        }
    }

    /// A list-only record for unit tests.
    #[cfg(test)]
    pub fn dummy(tid: u32, wake: u32) -> Box<Thread> {
        let mut t = Box::new(Thread::blank(tid));
        t.wake = wake;
        t
    }
}

pub fn next_tid() -> u32 {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

/// Creates a thread inside `process`: fresh tid, two-page kernel stack,
/// linkage into the process's thread chain and the global tid hash.
///
/// # Safety
/// `process` must be a live process control block.
pub unsafe fn create_thread(process: *mut Process) -> KernelResult<*mut Thread> {
    let mut thread = Box::new(Thread::blank(next_tid()));

    let kstack = allocator::alloc_kernel_pages(KERNEL_STACK_PAGES);
    if kstack.is_null() {
        return Err(KernelError::MallocFail);
    }
    thread.kstack = kstack;
    thread.esp0 = kstack as u32 + KERNEL_STACK_SIZE as u32;
    thread.process = process;

    (*process).threads += 1;
    if (*process).original_tid.is_none() {
        (*process).original_tid = Some(thread.tid);
    }

    let raw = Box::into_raw(thread);

    // Youngest-first sibling chain
    if !(*process).youngest_thread.is_null() {
        (*raw).older_sibling = (*process).youngest_thread;
        (*(*process).youngest_thread).younger_sibling = raw;
    }
    (*process).youngest_thread = raw;

    crate::scheduler::register_thread(raw);

    Ok(raw)
}

/// Clones `target` into `process`. The kernel context and user stack pointer
/// carry over; the swexn registration only when `keep_handler` is set.
///
/// # Safety
/// Both pointers must be live control blocks.
pub unsafe fn copy_thread(
    process: *mut Process,
    target: *mut Thread,
    keep_handler: bool,
) -> KernelResult<*mut Thread> {
    let thread = create_thread(process)?;

    (*thread).context = (*target).context;
    (*thread).esp3 = (*target).esp3;
    if keep_handler {
        (*thread).swexn = (*target).swexn;
    }

    Ok(thread)
}

/// Makes the calling thread unexecutable: releases every held mutex, leaves
/// whatever scheduler list it was on and decrements the owning process's
/// active count. The record itself survives until a reaper runs
/// [`destroy_thread`].
pub unsafe fn vanish_thread() -> KernelResult<()> {
    let me = crate::scheduler::get_self();

    // Held mutexes unlock in LIFO order; unlock pops `acquired_lock`.
    while !(*me).acquired_lock.is_null() {
        (*(*me).acquired_lock).unlock();
    }

    // The unlocks above may have yielded and dropped the guard
    crate::drivers::timer::disable_preemption();

    ThreadList::remove(me)?;

    let process = (*me).process;
    if process.is_null() {
        return Err(KernelError::NoProcess);
    }
    (*process).threads -= 1;

    Ok(())
}

/// Frees everything a vanished thread left behind: the kernel stack, the
/// sibling link, the hash entry and the record itself. Runs on a different
/// thread than the one being destroyed.
///
/// # Safety
/// `thread` must be a vanished thread that is not on any scheduler list and
/// will never run again.
pub unsafe fn destroy_thread(thread: *mut Thread) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }

    let process = (*thread).process;

    let older = (*thread).older_sibling;
    let younger = (*thread).younger_sibling;
    if !older.is_null() {
        (*older).younger_sibling = younger;
    }
    if !younger.is_null() {
        (*younger).older_sibling = older;
    } else if !process.is_null() {
        (*process).youngest_thread = older;
    }
    (*thread).older_sibling = core::ptr::null_mut();
    (*thread).younger_sibling = core::ptr::null_mut();

    if !(*thread).kstack.is_null() {
        allocator::free_kernel_pages((*thread).kstack, KERNEL_STACK_PAGES);
    }

    crate::scheduler::unregister_thread(thread);
    drop(Box::from_raw(thread));

    Ok(())
}
