//! The leftovers: halt and readfile.

use crate::errors::{KernelError, KernelResult};
use crate::loader::archive;
use crate::syscalls::check;

/// Stops the machine.
pub fn halt() -> ! {
    crate::log_info!("System halted by request.");
    crate::arch::disable_interrupts();
    loop {
        crate::arch::hlt();
    }
}

/// Copies up to `count` bytes from an archive file, starting at `offset`,
/// into a user buffer.
pub fn readfile(filename_ptr: u32, buf: u32, count: i32, offset: i32) -> KernelResult<i32> {
    let filename = check::copy_string(filename_ptr).ok_or(KernelError::InvalidArg)?;

    if count < 0 || offset < 0 {
        return Err(KernelError::NegativeArg);
    }
    if !check::check_buffer(buf, count as usize, true) {
        return Err(KernelError::InvalidArg);
    }

    let dest = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count as usize) };
    let copied = archive::archive().getbytes(&filename, offset as usize, dest)?;

    Ok(copied as i32)
}
