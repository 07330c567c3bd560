//! Condition variables.
//!
//! An inner mutex guards the FIFO wait chain (linked through
//! `Thread::cond_nextwait`). Waiters deschedule themselves after dropping
//! both mutexes; wakers push a descheduled waiter back onto the run queue,
//! yielding to it while it is still on its way down.

use core::cell::Cell;

use crate::scheduler;
use crate::scheduler::thread::Thread;
use crate::syscalls::management;

use super::Mutex;

pub struct Condvar {
    inner: Mutex,
    first_waiting: Cell<*mut Thread>,
    last_waiting: Cell<*mut Thread>,
}

unsafe impl Sync for Condvar {}
unsafe impl Send for Condvar {}

impl Condvar {
    pub const fn new() -> Self {
        Condvar {
            inner: Mutex::new(),
            first_waiting: Cell::new(core::ptr::null_mut()),
            last_waiting: Cell::new(core::ptr::null_mut()),
        }
    }

    /// Releases `mp`, sleeps until signaled, reacquires `mp`.
    pub fn wait(&self, mp: &Mutex) {
        self.inner.lock();
        self.waitlist_push(scheduler::get_self());
        self.inner.unlock();

        mp.unlock();

        let reject = 0i32;
        let _ = unsafe { management::deschedule(&reject) };

        mp.lock();
    }

    /// Wakes the first waiter, if there is one at the moment the wait chain
    /// is inspected; otherwise the signal is lost.
    pub fn signal(&self) {
        self.inner.lock();
        let _ = self.wake_first();
        self.inner.unlock();
    }

    /// Wakes every thread currently on the wait chain.
    pub fn broadcast(&self) {
        self.inner.lock();
        while self.wake_first() {}
        self.inner.unlock();
    }

    /// The woken thread may not have finished descheduling yet; keep
    /// yielding to it until make_runnable lands.
    fn wake_first(&self) -> bool {
        let thread = self.waitlist_pop();
        if thread.is_null() {
            return false;
        }

        let tid = unsafe { (*thread).tid as i32 };
        while management::make_runnable(tid).is_err() {
            let _ = management::yield_to(tid);
        }

        true
    }

    fn waitlist_push(&self, thread: *mut Thread) {
        unsafe {
            (*thread).cond_nextwait = core::ptr::null_mut();
            if self.last_waiting.get().is_null() {
                self.first_waiting.set(thread);
            } else {
                (*self.last_waiting.get()).cond_nextwait = thread;
            }
            self.last_waiting.set(thread);
        }
    }

    fn waitlist_pop(&self) -> *mut Thread {
        let next = self.first_waiting.get();
        if !next.is_null() {
            unsafe {
                self.first_waiting.set((*next).cond_nextwait);
                (*next).cond_nextwait = core::ptr::null_mut();
            }
            if self.last_waiting.get() == next {
                self.last_waiting.set(core::ptr::null_mut());
            }
        }
        next
    }
}
