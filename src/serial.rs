// serial.rs
//! Polled 16550 UART, used as the log sink.

use core::fmt;

use crate::arch;

const COM1: u16 = 0x3F8;

const DATA: u16 = 0;
const INT_ENABLE: u16 = 1;
const FIFO_CTRL: u16 = 2;
const LINE_CTRL: u16 = 3;
const MODEM_CTRL: u16 = 4;
const LINE_STATUS: u16 = 5;

const LSR_THR_EMPTY: u8 = 0x20;

pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// COM1 at 38400 baud, 8N1, FIFOs on.
    pub fn com1() -> Self {
        let port = Self { base: COM1 };
        unsafe { port.init() };
        port
    }

    unsafe fn init(&self) {
        arch::outb(self.base + INT_ENABLE, 0x00);
        arch::outb(self.base + LINE_CTRL, 0x80); // DLAB
        arch::outb(self.base + DATA, 0x03); // divisor lo: 115200 / 3
        arch::outb(self.base + INT_ENABLE, 0x00); // divisor hi
        arch::outb(self.base + LINE_CTRL, 0x03);
        arch::outb(self.base + FIFO_CTRL, 0xC7);
        arch::outb(self.base + MODEM_CTRL, 0x0B);
    }

    pub fn send(&mut self, byte: u8) {
        unsafe {
            while arch::inb(self.base + LINE_STATUS) & LSR_THR_EMPTY == 0 {
                core::hint::spin_loop();
            }
            arch::outb(self.base + DATA, byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
        Ok(())
    }
}
