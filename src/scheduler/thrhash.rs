//! Hash index of every live thread, keyed by tid.
//!
//! One page worth of buckets, chained through the `hash_prev`/`hash_next`
//! links embedded in the thread control block. Gives O(1) tid lookup for
//! yield and make_runnable.

use crate::memory::PAGE_SIZE;
use crate::scheduler::thread::Thread;

pub const HASH_ENTRIES: usize = PAGE_SIZE / core::mem::size_of::<*mut Thread>();

pub struct ThreadHash {
    buckets: [*mut Thread; HASH_ENTRIES],
}

impl ThreadHash {
    pub const fn new() -> Self {
        ThreadHash { buckets: [core::ptr::null_mut(); HASH_ENTRIES] }
    }

    fn bucket(tid: u32) -> usize {
        tid as usize % HASH_ENTRIES
    }

    /// # Safety
    /// `thread` must be live and not already in the hash.
    pub unsafe fn add(&mut self, thread: *mut Thread) {
        let entry = Self::bucket((*thread).tid);

        (*thread).hash_prev = core::ptr::null_mut();
        (*thread).hash_next = self.buckets[entry];

        if !self.buckets[entry].is_null() {
            (*self.buckets[entry]).hash_prev = thread;
        }
        self.buckets[entry] = thread;
    }

    /// # Safety
    /// `thread` must be live and currently in the hash.
    pub unsafe fn remove(&mut self, thread: *mut Thread) {
        let entry = Self::bucket((*thread).tid);

        if !(*thread).hash_prev.is_null() {
            (*(*thread).hash_prev).hash_next = (*thread).hash_next;
        } else {
            self.buckets[entry] = (*thread).hash_next;
        }

        if !(*thread).hash_next.is_null() {
            (*(*thread).hash_next).hash_prev = (*thread).hash_prev;
        }

        (*thread).hash_next = core::ptr::null_mut();
        (*thread).hash_prev = core::ptr::null_mut();
    }

    pub fn find(&self, tid: u32) -> *mut Thread {
        let mut current = self.buckets[Self::bucket(tid)];

        unsafe {
            while !current.is_null() && (*current).tid != tid {
                current = (*current).hash_next;
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_find_remove() {
        let mut hash = ThreadHash::new();
        let mut a = Thread::dummy(7, 0);
        let mut b = Thread::dummy(7 + HASH_ENTRIES as u32, 0); // same bucket
        let mut c = Thread::dummy(8, 0);

        unsafe {
            hash.add(&mut *a);
            hash.add(&mut *b);
            hash.add(&mut *c);

            assert_eq!(hash.find(7), &mut *a as *mut Thread);
            assert_eq!(hash.find(7 + HASH_ENTRIES as u32), &mut *b as *mut Thread);
            assert_eq!(hash.find(8), &mut *c as *mut Thread);
            assert!(hash.find(9).is_null());

            hash.remove(&mut *b);
            assert!(hash.find(7 + HASH_ENTRIES as u32).is_null());
            assert_eq!(hash.find(7), &mut *a as *mut Thread);

            hash.remove(&mut *a);
            hash.remove(&mut *c);
            assert!(hash.find(7).is_null());
            assert!(hash.find(8).is_null());
        }
    }
}
