//! VGA text console: 80x25 cells at 0xB8000, one attribute byte per cell,
//! hardware cursor driven through the CRTC index/data ports.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;

use crate::arch::Port;

pub const BUFFER_HEIGHT: usize = 25;
pub const BUFFER_WIDTH: usize = 80;

const VGA_BUFFER_ADDR: usize = 0xB8000;
const CRTC_INDEX_PORT: u16 = 0x3D4;
const CRTC_DATA_PORT: u16 = 0x3D5;
const CRTC_CURSOR_HIGH: u8 = 0x0E;
const CRTC_CURSOR_LOW: u8 = 0x0F;

/// Default attribute: light gray on black.
pub const DEFAULT_COLOR: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    character: u8,
    color: u8,
}

#[repr(transparent)]
struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    row: usize,
    col: usize,
    color: u8,
    buffer: &'static mut Buffer,
    index_port: Port<u8>,
    data_port: Port<u8>,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            b'\r' => self.col = 0,
            0x08 => self.backspace(),
            byte => {
                if self.col >= BUFFER_WIDTH {
                    self.new_line();
                }
                let c = ScreenChar { character: byte, color: self.color };
                self.buffer.chars[self.row][self.col].write(c);
                self.col += 1;
            }
        }
        self.sync_cursor();
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x08 | 0x0A | 0x0D | 0x20..=0x7E => self.write_byte(byte),
                // Anything non-printable becomes a placeholder
                _ => self.write_byte(0xFE),
            }
        }
    }

    /// Erases the character before the cursor. Has no effect at the top-left
    /// corner of the screen; at column 0 it backs up to the end of the
    /// previous row.
    pub fn backspace(&mut self) {
        if self.col == 0 {
            if self.row == 0 {
                return;
            }
            self.row -= 1;
            self.col = BUFFER_WIDTH - 1;
        } else {
            self.col -= 1;
        }
        let blank = ScreenChar { character: b' ', color: self.color };
        self.buffer.chars[self.row][self.col].write(blank);
        self.sync_cursor();
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
        } else {
            self.scroll();
        }
    }

    fn scroll(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let c = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(c);
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar { character: b' ', color: self.color };
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[row][col].write(blank);
        }
    }

    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.row = 0;
        self.col = 0;
        self.sync_cursor();
    }

    pub fn set_color(&mut self, color: u8) {
        self.color = color;
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    pub fn set_cursor(&mut self, row: usize, col: usize) -> bool {
        if row >= BUFFER_HEIGHT || col >= BUFFER_WIDTH {
            return false;
        }
        self.row = row;
        self.col = col;
        self.sync_cursor();
        true
    }

    /// Pushes the logical cursor out to the CRTC.
    fn sync_cursor(&mut self) {
        let pos = (self.row * BUFFER_WIDTH + self.col) as u16;
        unsafe {
            self.index_port.write(CRTC_CURSOR_HIGH);
            self.data_port.write((pos >> 8) as u8);
            self.index_port.write(CRTC_CURSOR_LOW);
            self.data_port.write(pos as u8);
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        row: 0,
        col: 0,
        color: DEFAULT_COLOR,
        buffer: unsafe { &mut *(VGA_BUFFER_ADDR as *mut Buffer) },
        index_port: Port::new(CRTC_INDEX_PORT),
        data_port: Port::new(CRTC_DATA_PORT),
    });
}

pub fn init() {
    WRITER.lock().clear();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    crate::arch::without_interrupts(|| {
        let _ = WRITER.lock().write_fmt(args);
    });
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::vga::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
