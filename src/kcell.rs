use core::cell::UnsafeCell;

/// Interior-mutable slot for uniprocessor kernel singletons.
///
/// Access is serialized externally: either interrupts are disabled, the
/// preemption guard is held, or a kernel lock protects the call path. The
/// type only exists to make such statics expressible.
pub struct KCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for KCell<T> {}

impl<T> KCell<T> {
    pub const fn new(value: T) -> Self {
        KCell(UnsafeCell::new(value))
    }

    /// # Safety
    /// The caller must hold whichever discipline protects this value.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self) -> &mut T {
        &mut *self.0.get()
    }
}
