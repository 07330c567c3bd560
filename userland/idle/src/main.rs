//! The idle loop: runs when nothing else can.

#![no_std]
#![no_main]

opallibc::user_main!(main);

fn main(_argc: i32, _argv: *const *const u8) -> i32 {
    loop {
        core::hint::spin_loop();
    }
}
