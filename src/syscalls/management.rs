//! Thread management calls: yield, deschedule, make_runnable, sleep, tick
//! queries and software exception handler registration.

use crate::drivers::timer;
use crate::errors::{KernelError, KernelResult};
use crate::interrupts::exceptions::UReg;
use crate::interrupts::gdt::{USER_CS, USER_DS};
use crate::memory::USER_MEM_START;
use crate::scheduler;
use crate::scheduler::context::{self, TrapFrame};
use crate::scheduler::thread::{SwexnHandler, ThreadState};
use crate::syscalls::check;

/// EFLAGS bits user code may toggle through swexn: the arithmetic flags,
/// trap flag, direction flag and resume flag.
pub const AUTHORIZED_FLAGS: u32 = 0x0001_08D5;

pub fn gettid() -> i32 {
    unsafe { (*scheduler::get_self()).tid as i32 }
}

pub fn get_ticks() -> u32 {
    timer::get_time()
}

/// Hands the CPU to `tid`, or to the next runnable thread when `tid` is -1.
/// The caller stays runnable, so control comes back in queue order.
pub fn yield_to(tid: i32) -> KernelResult<i32> {
    let me = scheduler::get_self();

    let mut other = core::ptr::null_mut();
    if tid >= 0 {
        other = scheduler::get_thread(tid as u32);
        if other.is_null() || unsafe { (*other).state } != ThreadState::Running {
            return Err(KernelError::YieldNotRunnable);
        }
    }

    timer::disable_preemption();

    unsafe {
        if let Err(err) = scheduler::set_runnable(me) {
            timer::allow_preemption();
            return Err(err);
        }

        if other.is_null() {
            other = scheduler::get_running();
        }

        // With one runnable thread self == other and the switch is a no-op
        context::context_switch(me, other);
    }

    Ok(0)
}

/// Blocks the calling thread unless `*flag` is already nonzero. The flag
/// test is atomic against make_runnable on the same thread.
///
/// # Safety
/// `flag` must be readable; syscall wrappers validate user pointers first.
pub unsafe fn deschedule(flag: *const i32) -> KernelResult<i32> {
    let me = scheduler::get_self();

    (*me).thread_lock.lock();
    if *flag != 0 {
        (*me).thread_lock.unlock();
        return Ok(0);
    }

    timer::disable_preemption();
    (*me).thread_lock.unlock();
    // Unlock may have yielded to a waiter and dropped the guard
    timer::disable_preemption();

    if let Err(err) = scheduler::set_blocked(me) {
        timer::allow_preemption();
        return Err(err);
    }

    let mut other = scheduler::get_running();
    if other.is_null() {
        other = scheduler::idle_thread();
    }
    context::context_switch(me, other);

    Ok(0)
}

/// Puts a descheduled thread back on the run queue and transfers to it.
pub fn make_runnable(tid: i32) -> KernelResult<i32> {
    if tid < 0 {
        return Err(KernelError::InvalidTid);
    }

    let target = scheduler::get_thread(tid as u32);
    if target.is_null() || unsafe { (*target).state } != ThreadState::Blocked {
        return Err(KernelError::NotBlocked);
    }

    let me = scheduler::get_self();

    unsafe {
        (*target).thread_lock.lock();
        timer::disable_preemption();
        let result = scheduler::set_runnable(target);
        (*target).thread_lock.unlock();

        match result {
            Ok(()) => {
                context::context_switch(me, target);
                Ok(0)
            }
            Err(err) => {
                timer::allow_preemption();
                Err(err)
            }
        }
    }
}

/// Takes the calling thread off the CPU for at least `ticks` timer
/// interrupts. Zero is an immediate no-op.
pub fn sleep(ticks: i32) -> KernelResult<i32> {
    if ticks == 0 {
        return Ok(0);
    }
    if ticks < 0 {
        return Err(KernelError::NegativeSleep);
    }

    let me = scheduler::get_self();

    timer::disable_preemption();

    unsafe {
        if let Err(err) = scheduler::set_sleeping(me, ticks as u32) {
            timer::allow_preemption();
            return Err(err);
        }

        let mut other = scheduler::get_running();
        if other.is_null() {
            other = scheduler::idle_thread();
        }
        context::context_switch(me, other);
    }

    Ok(0)
}

/// Registers or removes the per-thread software exception handler, and
/// optionally installs a vetted register set for the return to user mode.
/// A rejected register set aborts the whole call.
pub fn swexn(
    tf: &mut TrapFrame,
    esp3: u32,
    eip: u32,
    arg: u32,
    newureg_addr: u32,
) -> KernelResult<i32> {
    if esp3 != 0 && !check::check_page(esp3, true) {
        return Err(KernelError::InvalidArg);
    }
    if eip != 0 && (!check::check_page(eip, false) || eip < USER_MEM_START) {
        return Err(KernelError::InvalidArg);
    }

    let mut newureg = None;
    if newureg_addr != 0 {
        if !check::check_buffer(newureg_addr, core::mem::size_of::<UReg>(), false) {
            return Err(KernelError::InvalidArg);
        }
        let ureg = unsafe { *(newureg_addr as *const UReg) };

        let seg_ok = |seg: u32| seg == USER_DS as u32 || seg == USER_CS as u32;
        if !seg_ok(ureg.ds) || !seg_ok(ureg.es) || !seg_ok(ureg.fs) || !seg_ok(ureg.gs) {
            return Err(KernelError::InvalidArg);
        }
        if (ureg.eflags ^ tf.eflags) & !AUTHORIZED_FLAGS != 0 {
            return Err(KernelError::InvalidArg);
        }

        newureg = Some(ureg);
    }

    let me = scheduler::get_self();
    unsafe {
        if esp3 == 0 || eip == 0 {
            (*me).swexn = None;
        } else {
            (*me).swexn = Some(SwexnHandler { esp3, eip, arg });
        }
    }

    if let Some(ureg) = newureg {
        // Segment registers were vetted above; cs and ss stay put
        tf.ds = ureg.ds;
        tf.es = ureg.es;
        tf.fs = ureg.fs;
        tf.gs = ureg.gs;

        tf.ebp = ureg.ebp;
        tf.ebx = ureg.ebx;
        tf.ecx = ureg.ecx;
        tf.edx = ureg.edx;
        tf.edi = ureg.edi;
        tf.esi = ureg.esi;

        // Bad esp or eip values fault in user mode, not here
        tf.esp = ureg.esp;
        tf.eip = ureg.eip;
        tf.eflags |= ureg.eflags & AUTHORIZED_FLAGS;
    }

    Ok(0)
}
