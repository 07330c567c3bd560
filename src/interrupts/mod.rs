//! Descriptor tables, the interrupt controllers and the trap plumbing.

pub mod exceptions;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod trampolines;

/// Brings up the descriptor tables, the exception gates and the PICs.
/// Interrupts stay disabled; the boot sequence enables them once the first
/// thread exists.
pub fn init() {
    gdt::init();
    exceptions::install();
    idt::load();
    pic::init();
    crate::log_info!("Descriptor tables and interrupt controllers ready.");
}
