//! Intrusive doubly-linked thread lists.
//!
//! The links live inside the thread control block, so membership is limited
//! to one list at a time, which is exactly the scheduling invariant: a
//! thread cannot be runnable and sleeping at once. A thread records which
//! list it is on, so removal needs no list argument.

use crate::errors::{KernelError, KernelResult};
use crate::scheduler::thread::Thread;

pub struct ThreadList {
    pub head: *mut Thread,
    pub tail: *mut Thread,
    pub len: usize,
}

impl ThreadList {
    pub const fn new() -> Self {
        ThreadList {
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// `thread` must be live and not concurrently mutated.
    pub unsafe fn push_head(&mut self, thread: *mut Thread) -> KernelResult<()> {
        if thread.is_null() {
            return Err(KernelError::ArgNull);
        }
        if !(*thread).list.is_null() {
            return Err(KernelError::ThreadInList);
        }

        (*thread).next = self.head;
        (*thread).prev = core::ptr::null_mut();

        if self.len > 0 {
            (*self.head).prev = thread;
        } else {
            self.tail = thread;
        }

        self.head = thread;
        self.len += 1;
        (*thread).list = self;

        Ok(())
    }

    /// # Safety
    /// `thread` must be live and not concurrently mutated.
    pub unsafe fn push_tail(&mut self, thread: *mut Thread) -> KernelResult<()> {
        if thread.is_null() {
            return Err(KernelError::ArgNull);
        }
        if !(*thread).list.is_null() {
            return Err(KernelError::ThreadInList);
        }

        (*thread).prev = self.tail;
        (*thread).next = core::ptr::null_mut();

        if self.len > 0 {
            (*self.tail).next = thread;
        } else {
            self.head = thread;
        }

        self.tail = thread;
        self.len += 1;
        (*thread).list = self;

        Ok(())
    }

    /// Inserts keeping the list sorted by ascending wake tick. Scans from
    /// the tail: sleepers overwhelmingly arrive with the latest deadline.
    ///
    /// # Safety
    /// `thread` must be live and not concurrently mutated.
    pub unsafe fn insert_by_wake(&mut self, thread: *mut Thread) -> KernelResult<()> {
        if thread.is_null() {
            return Err(KernelError::ArgNull);
        }
        if !(*thread).list.is_null() {
            return Err(KernelError::ThreadInList);
        }

        if self.len == 0 {
            return self.push_head(thread);
        }

        let mut current = self.tail;
        while !current.is_null() && (*current).wake > (*thread).wake {
            current = (*current).prev;
        }

        if current.is_null() {
            return self.push_head(thread);
        }
        if current == self.tail {
            return self.push_tail(thread);
        }

        // Splice in right after `current`
        (*thread).prev = current;
        (*thread).next = (*current).next;
        if !(*current).next.is_null() {
            (*(*current).next).prev = thread;
        }
        (*current).next = thread;

        self.len += 1;
        (*thread).list = self;

        Ok(())
    }

    /// Detaches `thread` from whichever list it is on. Returns `false` when
    /// it was on none.
    ///
    /// # Safety
    /// `thread` must be live and not concurrently mutated.
    pub unsafe fn remove(thread: *mut Thread) -> KernelResult<bool> {
        if thread.is_null() {
            return Err(KernelError::ArgNull);
        }

        let list = (*thread).list;
        if list.is_null() {
            return Ok(false);
        }

        if !(*thread).prev.is_null() {
            (*(*thread).prev).next = (*thread).next;
        } else {
            (*list).head = (*thread).next;
        }

        if !(*thread).next.is_null() {
            (*(*thread).next).prev = (*thread).prev;
        } else {
            (*list).tail = (*thread).prev;
        }

        (*list).len -= 1;
        (*thread).list = core::ptr::null_mut();
        (*thread).next = core::ptr::null_mut();
        (*thread).prev = core::ptr::null_mut();

        Ok(true)
    }

    /// Empties the list, detaching every member.
    ///
    /// # Safety
    /// All members must be live.
    pub unsafe fn clear(&mut self) {
        while self.len != 0 {
            let _ = Self::remove(self.head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn collect_tids(list: &ThreadList) -> Vec<u32> {
        let mut tids = Vec::new();
        let mut cur = list.head;
        while !cur.is_null() {
            unsafe {
                tids.push((*cur).tid);
                cur = (*cur).next;
            }
        }
        tids
    }

    #[test]
    fn push_and_remove() {
        let mut list = ThreadList::new();
        let mut a = Thread::dummy(1, 0);
        let mut b = Thread::dummy(2, 0);
        let mut c = Thread::dummy(3, 0);

        unsafe {
            list.push_tail(&mut *a).unwrap();
            list.push_tail(&mut *b).unwrap();
            list.push_head(&mut *c).unwrap();
            assert_eq!(collect_tids(&list), [3, 1, 2]);
            assert_eq!(list.len, 3);

            assert!(ThreadList::remove(&mut *a).unwrap());
            assert_eq!(collect_tids(&list), [3, 2]);

            // A detached thread is not on any list
            assert!(!ThreadList::remove(&mut *a).unwrap());

            list.clear();
            assert!(list.is_empty());
        }
    }

    #[test]
    fn double_insert_is_rejected() {
        let mut list = ThreadList::new();
        let mut other = ThreadList::new();
        let mut a = Thread::dummy(1, 0);

        unsafe {
            list.push_tail(&mut *a).unwrap();
            assert_eq!(
                other.push_tail(&mut *a),
                Err(crate::errors::KernelError::ThreadInList)
            );
            list.clear();
        }
    }

    #[test]
    fn sorted_insert_orders_by_wake() {
        let mut list = ThreadList::new();
        let mut threads: Vec<Box<Thread>> = [300u32, 100, 200, 250, 50]
            .iter()
            .enumerate()
            .map(|(i, wake)| Thread::dummy(i as u32, *wake))
            .collect();

        unsafe {
            for t in threads.iter_mut() {
                list.insert_by_wake(&mut **t).unwrap();
            }

            let mut wakes = Vec::new();
            let mut cur = list.head;
            while !cur.is_null() {
                wakes.push((*cur).wake);
                cur = (*cur).next;
            }
            assert_eq!(wakes, [50, 100, 200, 250, 300]);
            list.clear();
        }
    }

    #[test]
    fn head_and_tail_track_membership() {
        let mut list = ThreadList::new();
        let mut a = Thread::dummy(1, 0);
        let mut b = Thread::dummy(2, 0);

        unsafe {
            list.push_tail(&mut *a).unwrap();
            list.push_tail(&mut *b).unwrap();
            assert!(ThreadList::remove(&mut *b).unwrap());
            assert_eq!(list.tail, list.head);
            assert!(ThreadList::remove(&mut *a).unwrap());
            assert!(list.head.is_null());
            assert!(list.tail.is_null());
        }
    }
}
