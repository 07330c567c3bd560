//! Thread state accounting.
//!
//! Two scheduler lists drive everything: `running`, whose head is by
//! definition the thread holding the CPU, and `sleeping`, kept sorted by
//! wake tick. Blocked and zombie threads are on no list at all; waiting
//! threads live on their process's waiter queue. Every state change funnels
//! through the `set_*` functions here, which keep the one-list-at-a-time
//! invariant.

pub mod context;
pub mod process;
pub mod thread;
pub mod thrhash;
pub mod thrlist;

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::arch;
use crate::drivers::timer;
use crate::errors::{KernelError, KernelResult};
use crate::kcell::KCell;
use crate::kernel_panic;
use crate::sync::RwLock;

use process::Process;
use thread::{Thread, ThreadState};
use thrhash::ThreadHash;
use thrlist::ThreadList;

struct Lists {
    running: ThreadList,
    sleeping: ThreadList,
}

static LISTS: KCell<Lists> = KCell::new(Lists {
    running: ThreadList::new(),
    sleeping: ThreadList::new(),
});

static HASH_LOCK: RwLock = RwLock::new();
static HASH: KCell<ThreadHash> = KCell::new(ThreadHash::new());

static IDLE_THREAD: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());
static INIT_THREAD: AtomicPtr<Thread> = AtomicPtr::new(core::ptr::null_mut());

pub fn init() {
    crate::log_info!("Thread registry initialized.");
}

/// Detaches a thread from whatever scheduler list it is on. Until somebody
/// gives it a new state it counts as a zombie.
///
/// # Safety
/// `thread` must be live; preemption must be suppressed by the caller.
pub unsafe fn unset_state(thread: *mut Thread) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }

    ThreadList::remove(thread)?;
    (*thread).state = ThreadState::Zombie;
    Ok(())
}

/// Declares `thread` the CPU holder: head of the running list, kernel stack
/// base in the TSS, its process's page directory active.
///
/// # Safety
/// `thread` must be live; called on the way into a context switch with
/// interrupts disabled, or at boot before interrupts exist.
pub unsafe fn set_running(thread: *mut Thread) {
    if thread.is_null() {
        kernel_panic!("switching to a null thread");
    }

    if unset_state(thread).is_err() {
        kernel_panic!("thread {} cannot take the cpu", (*thread).tid);
    }
    if LISTS.get().running.push_head(thread).is_err() {
        kernel_panic!("running list rejected thread {}", (*thread).tid);
    }
    (*thread).state = ThreadState::Running;

    crate::interrupts::gdt::set_esp0((*thread).esp0);
    arch::write_cr3((*(*thread).process).cr3 as u32);
}

/// Appends `thread` to the tail of the running list.
///
/// # Safety
/// `thread` must be live; preemption must be suppressed by the caller.
pub unsafe fn set_runnable(thread: *mut Thread) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }

    arch::without_interrupts(|| unsafe {
        unset_state(thread)?;
        (*thread).state = ThreadState::Running;
        LISTS.get().running.push_tail(thread)
    })
}

/// Removes `thread` from all lists; it will only run again when somebody
/// makes it runnable by tid.
///
/// # Safety
/// `thread` must be live; preemption must be suppressed by the caller.
pub unsafe fn set_blocked(thread: *mut Thread) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }

    arch::without_interrupts(|| unsafe {
        unset_state(thread)?;
        (*thread).state = ThreadState::Blocked;
        Ok(())
    })
}

/// Queues `thread` on the sleep list, waking `ticks` from now.
///
/// # Safety
/// `thread` must be live; preemption must be suppressed by the caller.
pub unsafe fn set_sleeping(thread: *mut Thread, ticks: u32) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }

    arch::without_interrupts(|| unsafe {
        unset_state(thread)?;
        (*thread).wake = timer::get_time().wrapping_add(ticks);
        (*thread).state = ThreadState::Sleeping;
        LISTS.get().sleeping.insert_by_wake(thread)
    })
}

/// Parks `thread` on its process's waiter queue for `wait`.
///
/// # Safety
/// `thread` must be live; preemption must be suppressed by the caller.
pub unsafe fn set_waiting(thread: *mut Thread) -> KernelResult<()> {
    if thread.is_null() {
        return Err(KernelError::ArgNull);
    }
    let process = (*thread).process;
    if process.is_null() {
        return Err(KernelError::NoProcess);
    }

    arch::without_interrupts(|| unsafe {
        unset_state(thread)?;
        (*thread).state = ThreadState::Waiting;
        (*process).waiting.push_tail(thread)
    })
}

/// Head of the running list; null when nothing is runnable.
pub fn get_running() -> *mut Thread {
    arch::without_interrupts(|| unsafe { LISTS.get().running.head })
}

/// The calling thread. The head of the running list is the CPU holder, so
/// a null head here means the scheduler state is corrupt.
pub fn get_self() -> *mut Thread {
    let head = get_running();
    if head.is_null() {
        kernel_panic!("running list has no head");
    }
    head
}

/// Head of the sleep queue: the thread with the earliest wake tick.
pub fn get_sleeping() -> *mut Thread {
    arch::without_interrupts(|| unsafe { LISTS.get().sleeping.head })
}

/// First thread of `parent` blocked in wait, if any.
///
/// # Safety
/// `parent` must be live or null.
pub unsafe fn get_waiting(parent: *mut Process) -> *mut Thread {
    if parent.is_null() {
        core::ptr::null_mut()
    } else {
        (*parent).waiting.head
    }
}

pub fn num_runnable() -> usize {
    arch::without_interrupts(|| unsafe { LISTS.get().running.len })
}

/// Looks a thread up by tid.
pub fn get_thread(tid: u32) -> *mut Thread {
    HASH_LOCK.read();
    let found = unsafe { HASH.get().find(tid) };
    HASH_LOCK.unlock();
    found
}

/// # Safety
/// `thread` must be live and not yet registered.
pub unsafe fn register_thread(thread: *mut Thread) {
    HASH_LOCK.write();
    HASH.get().add(thread);
    HASH_LOCK.unlock();
}

/// # Safety
/// `thread` must be registered.
pub unsafe fn unregister_thread(thread: *mut Thread) {
    HASH_LOCK.write();
    HASH.get().remove(thread);
    HASH_LOCK.unlock();
}

/// Records the idle thread and cuts it loose from the family graph: idle is
/// nobody's child and is never reaped.
///
/// # Safety
/// `idle` must be live; runs once during boot.
pub unsafe fn set_idle(idle: *mut Thread) -> KernelResult<()> {
    if idle.is_null() {
        return Err(KernelError::ArgNull);
    }
    IDLE_THREAD.store(idle, Ordering::Relaxed);

    let process = (*idle).process;
    (*process).original_tid = None;

    let parent = (*process).parent;
    if !parent.is_null() {
        let older = (*process).older_sibling;
        let younger = (*process).younger_sibling;
        if !older.is_null() {
            (*older).younger_sibling = younger;
        }
        if !younger.is_null() {
            (*younger).older_sibling = older;
        } else {
            (*parent).youngest_child = older;
        }
        (*process).older_sibling = core::ptr::null_mut();
        (*process).younger_sibling = core::ptr::null_mut();
        (*parent).children -= 1;
        (*process).parent = core::ptr::null_mut();
    }

    Ok(())
}

/// Records the init thread, the adoptive parent for orphans.
///
/// # Safety
/// `init` must be live; runs once during boot.
pub unsafe fn set_init(init: *mut Thread) -> KernelResult<()> {
    if init.is_null() {
        return Err(KernelError::ArgNull);
    }
    INIT_THREAD.store(init, Ordering::Relaxed);
    Ok(())
}

pub fn idle_thread() -> *mut Thread {
    IDLE_THREAD.load(Ordering::Relaxed)
}

pub fn init_thread() -> *mut Thread {
    INIT_THREAD.load(Ordering::Relaxed)
}

pub fn is_idle(thread: *mut Thread) -> bool {
    !thread.is_null() && thread == idle_thread()
}
