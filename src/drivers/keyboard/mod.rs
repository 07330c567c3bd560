//! PS/2 keyboard driver.
//!
//! The interrupt handler stores raw scancodes in a fixed ring; when the ring
//! is full the newest input is dropped so what the user typed first is what
//! comes out first. Consumers block on a condition variable until the
//! handler signals fresh input. Decoding happens on the consumer side.

pub mod scancodes;

use crate::arch::Port;
use crate::interrupts::gdt::KERNEL_CS;
use crate::interrupts::idt::{self, TrapGate};
use crate::interrupts::pic;
use crate::interrupts::trampolines;
use crate::kcell::KCell;
use crate::scheduler::context::TrapFrame;
use crate::sync::{Condvar, Mutex};

use scancodes::{KeyCode, KeyboardState};

pub const KEYBOARD_VECTOR: usize = pic::PIC_1_OFFSET as usize + 1;

const KEYBOARD_PORT: u16 = 0x60;
const KEY_BUFFER_SIZE: usize = 256;

struct KeyBuffer {
    buffer: [u8; KEY_BUFFER_SIZE],
    /// Index of the last scancode the handler stored.
    last_entered: usize,
    /// Index of the last scancode handed to a consumer.
    last_processed: usize,
    /// Disambiguates the equal-index case: full vs. empty.
    full: bool,
    decode: KeyboardState,
}

static BUFFER: KCell<KeyBuffer> = KCell::new(KeyBuffer {
    buffer: [0; KEY_BUFFER_SIZE],
    last_entered: 0,
    last_processed: 0,
    full: false,
    decode: KeyboardState::new(),
});

static KEYBOARD_LOCK: Mutex = Mutex::new();
static NEW_KEY: Condvar = Condvar::new();

pub fn init() {
    let gate = TrapGate {
        segment: KERNEL_CS,
        offset: trampolines::keyboard_entry as u32,
        privilege_level: 0,
    };
    idt::insert(idt::trap_gate_entry(&gate), KEYBOARD_VECTOR);

    // Drain anything the 8042 buffered across boot
    let _ = unsafe { Port::<u8>::new(KEYBOARD_PORT).read() };

    crate::log_info!("PS/2 keyboard driver initialized.");
}

/// Signals only after acknowledging, so input keeps flowing even if the
/// wakeup path stalls.
pub extern "C" fn keyboard_interrupt(_tf: &mut TrapFrame) {
    KEYBOARD_LOCK.lock();

    let buf = unsafe { BUFFER.get() };
    if !buf.full {
        let next = (buf.last_entered + 1) % KEY_BUFFER_SIZE;
        buf.buffer[next] = unsafe { Port::<u8>::new(KEYBOARD_PORT).read() };
        buf.last_entered = next;
        if buf.last_entered == buf.last_processed {
            buf.full = true;
        }
    } else {
        // Ring is full: drop the newcomer, keep the backlog
        let _ = unsafe { Port::<u8>::new(KEYBOARD_PORT).read() };
    }

    KEYBOARD_LOCK.unlock();
    pic::ack_interrupt(KEYBOARD_VECTOR as u8);

    NEW_KEY.signal();
}

/// Blocks until a printable byte, newline or backspace arrives.
pub fn readchar() -> u8 {
    KEYBOARD_LOCK.lock();

    let byte = loop {
        let buf = unsafe { BUFFER.get() };
        if buf.last_processed != buf.last_entered || buf.full {
            let next = (buf.last_processed + 1) % KEY_BUFFER_SIZE;
            let scancode = buf.buffer[next];
            buf.last_processed = next;
            buf.full = false;

            match buf.decode.process_scancode(scancode) {
                KeyCode::Char(byte) => break byte,
                KeyCode::Enter => break b'\n',
                KeyCode::Backspace => break 0x08,
                KeyCode::Unknown => continue,
            }
        } else {
            NEW_KEY.wait(&KEYBOARD_LOCK);
        }
    };

    KEYBOARD_LOCK.unlock();
    byte
}
