//! The timer: tick accounting, sleep wakeups and round-robin slicing.
//!
//! The `no_switch` guard suppresses timer-driven switches while kernel code
//! has the scheduler lists in an intermediate state. The tick counter wraps;
//! sleeps straddling the wrap drift by one full span, which is accepted.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch::Port;
use crate::interrupts::gdt::KERNEL_CS;
use crate::interrupts::idt::{self, TrapGate};
use crate::interrupts::pic;
use crate::interrupts::trampolines;
use crate::kernel_panic;
use crate::scheduler;
use crate::scheduler::context::{self, TrapFrame};

pub const TIMER_VECTOR: usize = pic::PIC_1_OFFSET as usize;

/// Timer interrupts per second.
pub const TIMER_INTERRUPT_RATE: u32 = 100;
const PIT_INPUT_HZ: u32 = 1_193_182;

const PIT_MODE_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;
const PIT_SQUARE_WAVE: u8 = 0x36;

static NUM_TICKS: AtomicU32 = AtomicU32::new(0);
static NO_SWITCH: AtomicBool = AtomicBool::new(false);

pub fn init() {
    let gate = TrapGate {
        segment: KERNEL_CS,
        offset: trampolines::timer_entry as u32,
        privilege_level: 0,
    };
    idt::insert(idt::trap_gate_entry(&gate), TIMER_VECTOR);

    let period = (PIT_INPUT_HZ / TIMER_INTERRUPT_RATE) as u16;
    unsafe {
        Port::<u8>::new(PIT_MODE_PORT).write(PIT_SQUARE_WAVE);
        Port::<u8>::new(PIT_CHANNEL0_PORT).write(period as u8);
        Port::<u8>::new(PIT_CHANNEL0_PORT).write((period >> 8) as u8);
    }

    crate::log_info!("Timer programmed at {} Hz.", TIMER_INTERRUPT_RATE);
}

/// Ticks since boot. Wraps.
pub fn get_time() -> u32 {
    NUM_TICKS.load(Ordering::Relaxed)
}

/// Stops the timer handler from context switching until allowed again.
/// Taken around every window where the running-list head is not the thread
/// holding the CPU.
pub fn disable_preemption() {
    NO_SWITCH.store(true, Ordering::Release);
}

pub fn allow_preemption() {
    NO_SWITCH.store(false, Ordering::Release);
}

pub fn preemption_disabled() -> bool {
    NO_SWITCH.load(Ordering::Acquire)
}

/// One timer tick.
///
/// Due sleepers move to the run queue; then the quantum rotates: a non-idle
/// current thread goes to the tail and the new head takes over, while the
/// idle thread is displaced as soon as anything else is runnable. The
/// controller is acknowledged before any switch so the next tick can arrive
/// in the destination thread.
pub extern "C" fn timer_interrupt(_tf: &mut TrapFrame) {
    let now = NUM_TICKS.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

    if preemption_disabled() {
        pic::ack_interrupt(TIMER_VECTOR as u8);
        return;
    }

    unsafe {
        let mut awoke = false;
        loop {
            let head = scheduler::get_sleeping();
            if head.is_null() || (*head).wake > now {
                break;
            }
            if scheduler::set_runnable(head).is_err() {
                kernel_panic!("sleeping thread {} refused to wake", (*head).tid);
            }
            awoke = true;
        }

        let current = scheduler::get_running();
        if current.is_null() {
            // Boot path: no thread owns the CPU yet
            pic::ack_interrupt(TIMER_VECTOR as u8);
            return;
        }

        if awoke && scheduler::is_idle(current) {
            let _ = scheduler::unset_state(current);
            let other = scheduler::get_running();
            scheduler_switch(current, other);
            return;
        }

        let mut other = core::ptr::null_mut();
        if !scheduler::is_idle(current) {
            if scheduler::set_runnable(current).is_err() {
                kernel_panic!("running thread {} cannot rotate", (*current).tid);
            }
            other = scheduler::get_running();
        } else if scheduler::num_runnable() > 1 {
            let _ = scheduler::unset_state(current);
            other = scheduler::get_running();
        }

        if !other.is_null() {
            scheduler_switch(current, other);
        } else {
            pic::ack_interrupt(TIMER_VECTOR as u8);
        }
    }
}

unsafe fn scheduler_switch(
    current: *mut crate::scheduler::thread::Thread,
    other: *mut crate::scheduler::thread::Thread,
) {
    disable_preemption();
    pic::ack_interrupt(TIMER_VECTOR as u8);
    context::context_switch(current, other);
}
