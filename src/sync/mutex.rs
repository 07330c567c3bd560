//! The kernel mutex.
//!
//! A one-byte test-and-set latch serializes the short metadata updates; the
//! mutex itself parks contenders on an intrusive FIFO wait chain and hands
//! the lock over in queueing order. A thread spinning on the latch yields to
//! whoever holds it rather than burning its quantum.
//!
//! Every acquired mutex is pushed on a per-thread stack of held locks so a
//! vanishing thread can release everything it still holds, and so unlocking
//! out of order is caught as the kernel bug it would be.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::kernel_panic;
use crate::scheduler;
use crate::scheduler::thread::{Thread, ThreadState};
use crate::syscalls::management;

pub struct Mutex {
    /// Serializes access to the fields below.
    latch: AtomicBool,
    /// Thread currently inside the critical section; null when free.
    owner: Cell<*mut Thread>,
    /// Thread currently holding the latch, as a yield target.
    latch_owner: Cell<*mut Thread>,
    /// FIFO wait chain, linked through `Thread::mutex_nextwait`.
    first_waiting: Cell<*mut Thread>,
    last_waiting: Cell<*mut Thread>,
    /// Next-older entry in the owner's stack of held mutexes.
    previous: Cell<*const Mutex>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            latch: AtomicBool::new(false),
            owner: Cell::new(core::ptr::null_mut()),
            latch_owner: Cell::new(core::ptr::null_mut()),
            first_waiting: Cell::new(core::ptr::null_mut()),
            last_waiting: Cell::new(core::ptr::null_mut()),
            previous: Cell::new(core::ptr::null()),
        }
    }

    fn latch_acquire(&self, me: *mut Thread) {
        while self.latch.swap(true, Ordering::Acquire) {
            let holder = self.latch_owner.get();
            let tid = if holder.is_null() { -1 } else { unsafe { (*holder).tid as i32 } };
            let _ = management::yield_to(tid);
        }
        self.latch_owner.set(me);
    }

    fn latch_release(&self) {
        self.latch_owner.set(core::ptr::null_mut());
        self.latch.store(false, Ordering::Release);
    }

    pub fn lock(&self) {
        if !super::operational() {
            return;
        }

        let me = scheduler::get_self();
        self.latch_acquire(me);

        if self.owner.get().is_null() {
            self.owner.set(me);
        } else {
            let mut queued = false;
            while self.owner.get() != me {
                if !queued {
                    self.waitlist_push(me);
                    queued = true;
                }

                // Hand the latch back and let the owner make progress;
                // unlock will promote us in queue order.
                let owner = self.owner.get();
                let owner_tid = if owner.is_null() { -1 } else { unsafe { (*owner).tid as i32 } };
                self.latch_release();
                let _ = management::yield_to(owner_tid);
                self.latch_acquire(me);
            }
        }

        unsafe {
            if core::ptr::eq((*me).acquired_lock, self) {
                kernel_panic!("thread {} relocked a held mutex", (*me).tid);
            }
            self.previous.set((*me).acquired_lock);
            (*me).acquired_lock = self as *const Mutex;
        }

        self.latch_release();
    }

    pub fn unlock(&self) {
        if !super::operational() {
            return;
        }

        let me = scheduler::get_self();
        self.latch_acquire(me);

        unsafe {
            if (*me).acquired_lock != self as *const Mutex {
                kernel_panic!("thread {} unlocked a mutex out of order", (*me).tid);
            }
            (*me).acquired_lock = self.previous.get();
        }
        self.previous.set(core::ptr::null());

        if self.owner.get().is_null() {
            // Unlock of an unheld mutex: nothing to hand over
            self.latch_release();
            return;
        }

        // Promote the first waiter that is still runnable; entries that
        // went stale while queued are skipped.
        let mut next;
        loop {
            next = self.waitlist_pop();
            if next.is_null() || unsafe { (*next).state == ThreadState::Running } {
                break;
            }
        }
        self.owner.set(next);

        self.latch_release();

        if !next.is_null() {
            let _ = management::yield_to(unsafe { (*next).tid as i32 });
        }
    }

    fn waitlist_push(&self, thread: *mut Thread) {
        unsafe {
            (*thread).mutex_nextwait = core::ptr::null_mut();
            if self.last_waiting.get().is_null() {
                self.first_waiting.set(thread);
            } else {
                (*self.last_waiting.get()).mutex_nextwait = thread;
            }
            self.last_waiting.set(thread);
        }
    }

    fn waitlist_pop(&self) -> *mut Thread {
        let next = self.first_waiting.get();
        if !next.is_null() {
            unsafe {
                self.first_waiting.set((*next).mutex_nextwait);
                (*next).mutex_nextwait = core::ptr::null_mut();
            }
            if self.last_waiting.get() == next {
                self.last_waiting.set(core::ptr::null_mut());
            }
        }
        next
    }
}
