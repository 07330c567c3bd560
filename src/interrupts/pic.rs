//! The chained 8259 interrupt controllers, remapped clear of the exception
//! vectors. Only the timer and keyboard lines are unmasked.

use spin::Mutex;

use crate::arch::Port;

pub const PIC_1_OFFSET: u8 = 0x20;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

const CMD_INIT: u8 = 0x11;
const CMD_END_OF_INTERRUPT: u8 = 0x20;
const MODE_8086: u8 = 0x01;

struct Pic {
    offset: u8,
    command: Port<u8>,
    data: Port<u8>,
}

pub struct ChainedPics {
    primary: Pic,
    secondary: Pic,
}

impl ChainedPics {
    pub const unsafe fn new(offset1: u8, offset2: u8) -> ChainedPics {
        ChainedPics {
            primary: Pic {
                offset: offset1,
                command: Port::new(0x20),
                data: Port::new(0x21),
            },
            secondary: Pic {
                offset: offset2,
                command: Port::new(0xA0),
                data: Port::new(0xA1),
            },
        }
    }

    pub unsafe fn initialize(&mut self) {
        self.primary.command.write(CMD_INIT);
        self.secondary.command.write(CMD_INIT);

        self.primary.data.write(self.primary.offset);
        self.secondary.data.write(self.secondary.offset);

        // Cascade wiring: secondary hangs off line 2
        self.primary.data.write(0x04);
        self.secondary.data.write(0x02);

        self.primary.data.write(MODE_8086);
        self.secondary.data.write(MODE_8086);

        // Unmask timer (0), keyboard (1) and the cascade line (2)
        self.primary.data.write(0xF8);
        self.secondary.data.write(0xFF);
    }

    pub unsafe fn notify_end_of_interrupt(&mut self, vector: u8) {
        if vector >= self.secondary.offset && vector < self.secondary.offset + 8 {
            self.secondary.command.write(CMD_END_OF_INTERRUPT);
        }
        self.primary.command.write(CMD_END_OF_INTERRUPT);
    }
}

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

pub fn init() {
    unsafe { PICS.lock().initialize() };
}

/// Acknowledges the interrupt currently in service so the next one can be
/// delivered.
pub fn ack_interrupt(vector: u8) {
    unsafe { PICS.lock().notify_end_of_interrupt(vector) };
}
