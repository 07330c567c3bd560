//! In-kernel blocking synchronization: mutex, condition variable and
//! reader/writer lock.
//!
//! All three suspend through the scheduler (yield, deschedule,
//! make_runnable), so they only start doing real work once the first thread
//! exists. Until [`install`] runs they are no-ops, which lets boot code call
//! through code paths that lock.

mod condvar;
mod mutex;
mod rwlock;

pub use condvar::Condvar;
pub use mutex::Mutex;
pub use rwlock::RwLock;

use core::sync::atomic::{AtomicBool, Ordering};

static OPERATIONAL: AtomicBool = AtomicBool::new(false);

/// Arms the primitives. Called once the boot thread is running.
pub fn install() {
    OPERATIONAL.store(true, Ordering::Release);
}

pub(crate) fn operational() -> bool {
    OPERATIONAL.load(Ordering::Acquire)
}
