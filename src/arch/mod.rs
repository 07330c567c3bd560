//! Thin layer over the privileged instructions the rest of the kernel needs.
//!
//! Everything here compiles to real machine accesses when targeting x86 and
//! to inert shims elsewhere, so the data-structure modules can be unit
//! tested on the build host.

#[cfg(target_arch = "x86")]
mod x86;
#[cfg(target_arch = "x86")]
pub use x86::*;

#[cfg(not(target_arch = "x86"))]
mod host;
#[cfg(not(target_arch = "x86"))]
pub use host::*;

/// Paging-enable bit of CR0.
pub const CR0_PG: u32 = 1 << 31;

/// Interrupt-enable bit of EFLAGS.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Run a closure with interrupts disabled, restoring the previous state.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let enabled = interrupts_enabled();
    if enabled {
        disable_interrupts();
    }
    let ret = f();
    if enabled {
        enable_interrupts();
    }
    ret
}
