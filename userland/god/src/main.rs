//! The bootstrap program: first into user mode. Forks the idle task, then
//! becomes init.

#![no_std]
#![no_main]

opallibc::user_main!(main);

fn main(_argc: i32, _argv: *const *const u8) -> i32 {
    if opallibc::fork() == 0 {
        opallibc::exec(b"idle\0".as_ptr(), core::ptr::null());
        // Only reachable when idle is missing from the archive
        opallibc::exit(-1);
    }

    opallibc::print(b"OpalOS: welcome.\n");

    let args: [*const u8; 2] = [b"init\0".as_ptr(), core::ptr::null()];
    opallibc::exec(b"init\0".as_ptr(), args.as_ptr());

    // exec only comes back on failure
    opallibc::halt();
}
