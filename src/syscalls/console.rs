//! Console system calls.
//!
//! One mutex serializes readers so a single thread owns the input prompt at
//! a time; another keeps printed output from interleaving.

use alloc::vec::Vec;

use crate::drivers::keyboard;
use crate::errors::{KernelError, KernelResult};
use crate::sync::Mutex;
use crate::syscalls::check;
use crate::vga;

static INPUT_LOCK: Mutex = Mutex::new();
static OUTPUT_LOCK: Mutex = Mutex::new();

pub const MAX_LINE_LENGTH: usize = 4096;

fn echo_byte(byte: u8) {
    crate::arch::without_interrupts(|| {
        vga::WRITER.lock().write_byte(byte);
    });
}

/// Reads one line from the keyboard into `buf`, echoing as it goes.
/// Terminates on newline or when the buffer fills; backspace edits the
/// line but never eats past its start, so erasing the last typed character
/// leaves the cursor where the prompt ended.
pub fn readline(size: i32, buf: u32) -> KernelResult<i32> {
    if size < 0 || size as usize > MAX_LINE_LENGTH {
        return Err(KernelError::InvalidArg);
    }
    let size = size as usize;
    if !check::check_buffer(buf, size, true) {
        return Err(KernelError::InvalidArg);
    }
    if size == 0 {
        return Ok(0);
    }

    let mut line: Vec<u8> = Vec::with_capacity(size);

    INPUT_LOCK.lock();

    loop {
        let byte = keyboard::readchar();
        match byte {
            b'\n' => {
                echo_byte(b'\n');
                line.push(b'\n');
                break;
            }
            0x08 => {
                if !line.is_empty() {
                    line.pop();
                    echo_byte(0x08);
                }
            }
            byte => {
                echo_byte(byte);
                line.push(byte);
                if line.len() == size {
                    break;
                }
            }
        }
    }

    INPUT_LOCK.unlock();

    unsafe {
        core::ptr::copy_nonoverlapping(line.as_ptr(), buf as *mut u8, line.len());
    }

    Ok(line.len() as i32)
}

/// Reads a single character, without echo.
pub fn getchar() -> KernelResult<i32> {
    INPUT_LOCK.lock();
    let byte = keyboard::readchar();
    INPUT_LOCK.unlock();
    Ok(byte as i32)
}

/// Prints `size` bytes from `buf` to the console as one unit.
pub fn print(size: i32, buf: u32) -> KernelResult<i32> {
    if size < 0 {
        return Err(KernelError::InvalidArg);
    }
    let size = size as usize;
    if !check::check_buffer(buf, size, false) {
        return Err(KernelError::InvalidArg);
    }

    let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, size) };

    OUTPUT_LOCK.lock();
    crate::arch::without_interrupts(|| {
        let mut writer = vga::WRITER.lock();
        for &byte in bytes {
            writer.write_byte(byte);
        }
    });
    OUTPUT_LOCK.unlock();

    Ok(0)
}

/// Sets the attribute byte used for subsequent output.
pub fn set_term_color(color: i32) -> KernelResult<i32> {
    if !(0..=0xFF).contains(&color) {
        return Err(KernelError::InvalidArg);
    }

    OUTPUT_LOCK.lock();
    crate::arch::without_interrupts(|| {
        vga::WRITER.lock().set_color(color as u8);
    });
    OUTPUT_LOCK.unlock();

    Ok(0)
}

/// Writes the cursor position through two user pointers.
pub fn get_cursor_pos(row_ptr: u32, col_ptr: u32) -> KernelResult<i32> {
    if !check::check_page(row_ptr, true) || !check::check_page(col_ptr, true) {
        return Err(KernelError::InvalidArg);
    }

    OUTPUT_LOCK.lock();
    let (row, col) =
        crate::arch::without_interrupts(|| vga::WRITER.lock().cursor());
    OUTPUT_LOCK.unlock();

    unsafe {
        *(row_ptr as *mut i32) = row as i32;
        *(col_ptr as *mut i32) = col as i32;
    }

    Ok(0)
}

/// Moves the cursor; out-of-screen positions are rejected.
pub fn set_cursor_pos(row: i32, col: i32) -> KernelResult<i32> {
    if row < 0 || col < 0 {
        return Err(KernelError::InvalidArg);
    }

    OUTPUT_LOCK.lock();
    let ok = crate::arch::without_interrupts(|| {
        vga::WRITER.lock().set_cursor(row as usize, col as usize)
    });
    OUTPUT_LOCK.unlock();

    if ok {
        Ok(0)
    } else {
        Err(KernelError::InvalidArg)
    }
}
