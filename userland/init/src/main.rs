//! init: adoptive parent of every orphaned task. Reaps exit statuses
//! forever.

#![no_std]
#![no_main]

opallibc::user_main!(main);

fn main(_argc: i32, _argv: *const *const u8) -> i32 {
    loop {
        let mut status = 0;
        if opallibc::wait(&mut status) < 0 {
            // No children right now; check back in a while
            opallibc::sleep(100);
        }
    }
}
