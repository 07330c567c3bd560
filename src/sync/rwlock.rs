//! Reader/writer lock with writer priority.
//!
//! An inner mutex protects the counters; two condition variables do the
//! waiting. `no_threads_in` wakes one writer when the lock empties,
//! `no_writers_in` wakes the whole reader pool. Whenever both could fire,
//! the writers are served first: readers can starve, writers cannot.

use core::cell::Cell;

use super::{Condvar, Mutex};

pub struct RwLock {
    mutex: Mutex,

    writer_in: Cell<bool>,
    readers_in: Cell<u32>,
    writers_waiting: Cell<u32>,
    readers_waiting: Cell<u32>,

    /// Signaled to one writer when no thread holds the lock.
    no_threads_in: Condvar,
    /// Broadcast to the readers when the last writer leaves.
    no_writers_in: Condvar,
}

unsafe impl Sync for RwLock {}
unsafe impl Send for RwLock {}

impl RwLock {
    pub const fn new() -> Self {
        RwLock {
            mutex: Mutex::new(),
            writer_in: Cell::new(false),
            readers_in: Cell::new(0),
            writers_waiting: Cell::new(0),
            readers_waiting: Cell::new(0),
            no_threads_in: Condvar::new(),
            no_writers_in: Condvar::new(),
        }
    }

    /// Enters the lock as a reader. Readers also hold back while writers
    /// are waiting, which is what gives the writers their priority.
    pub fn read(&self) {
        self.mutex.lock();

        // A broadcast can land before the next writer shows up, so recheck.
        while self.writer_in.get() || self.writers_waiting.get() > 0 {
            self.readers_waiting.set(self.readers_waiting.get() + 1);
            self.no_writers_in.wait(&self.mutex);
            self.readers_waiting.set(self.readers_waiting.get() - 1);
        }
        self.readers_in.set(self.readers_in.get() + 1);

        self.mutex.unlock();
    }

    /// Enters the lock as a writer once every other thread has left.
    /// Wakeups are a baton pass from the previous holder, so a single check
    /// suffices.
    pub fn write(&self) {
        self.mutex.lock();

        if self.writer_in.get() || self.readers_in.get() > 0 {
            self.writers_waiting.set(self.writers_waiting.get() + 1);
            self.no_threads_in.wait(&self.mutex);
            self.writers_waiting.set(self.writers_waiting.get() - 1);
        }
        self.writer_in.set(true);

        self.mutex.unlock();
    }

    /// Leaves the lock, in whichever role the caller held it.
    pub fn unlock(&self) {
        self.mutex.lock();

        if self.writer_in.get() {
            if self.writers_waiting.get() > 0 {
                // Keep writer_in set: the lock passes straight to the next
                // writer and no reader slips in between.
                self.no_threads_in.signal();
            } else {
                self.writer_in.set(false);
                self.no_writers_in.broadcast();
            }
        } else {
            self.readers_in.set(self.readers_in.get() - 1);
            if self.readers_in.get() == 0 && self.writers_waiting.get() > 0 {
                self.no_threads_in.signal();
            }
        }

        self.mutex.unlock();
    }

    /// Atomically trades a held write lock for a read lock, letting the
    /// waiting readers in alongside.
    pub fn downgrade(&self) {
        self.mutex.lock();

        self.writer_in.set(false);
        self.readers_in.set(self.readers_in.get() + 1);
        self.no_writers_in.broadcast();

        self.mutex.unlock();
    }
}
