//! Device drivers: timer tick source, keyboard input and the VGA console
//! (which lives in [`crate::vga`]).

pub mod keyboard;
pub mod timer;

pub fn init() {
    keyboard::init();
    timer::init();
    crate::log_info!("Drivers installed.");
}
