#![no_std]

use core::arch::asm;

/// Syscall numbers must match kernel
pub const SYS_HALT: u32 = 1;
pub const SYS_EXECUTE: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_OPEN: u32 = 5;
pub const SYS_CLOSE: u32 = 6;
pub const SYS_GETARGS: u32 = 7;
pub const SYS_VIDMAP: u32 = 8;
pub const SYS_SET_HANDLER: u32 = 9;
pub const SYS_SIGRETURN: u32 = 10;

pub const STDIN: i32 = 0;
pub const STDOUT: i32 = 1;

#[inline(always)]
unsafe fn syscall(num: u32, a1: u32, a2: u32, a3: u32) -> i32 {
    let ret: i32;
    asm!(
        "int 0x80",
        inlateout("eax") num as i32 => ret,
        in("ebx") a1,
        in("ecx") a2,
        in("edx") a3,
    );
    ret
}

pub fn halt(status: u8) -> ! {
    unsafe { syscall(SYS_HALT, status as u32, 0, 0) };
    loop {
        core::hint::spin_loop();
    }
}

/// Runs `command` (NUL-terminated) and returns its halt status, or -1.
pub fn execute(command: &[u8]) -> i32 {
    unsafe { syscall(SYS_EXECUTE, command.as_ptr() as u32, 0, 0) }
}

pub fn read(fd: i32, buf: &mut [u8]) -> i32 {
    unsafe { syscall(SYS_READ, fd as u32, buf.as_mut_ptr() as u32, buf.len() as u32) }
}

pub fn write(fd: i32, buf: &[u8]) -> i32 {
    unsafe { syscall(SYS_WRITE, fd as u32, buf.as_ptr() as u32, buf.len() as u32) }
}

/// `name` must be NUL-terminated.
pub fn open(name: &[u8]) -> i32 {
    unsafe { syscall(SYS_OPEN, name.as_ptr() as u32, 0, 0) }
}

pub fn close(fd: i32) -> i32 {
    unsafe { syscall(SYS_CLOSE, fd as u32, 0, 0) }
}

pub fn getargs(buf: &mut [u8]) -> i32 {
    unsafe { syscall(SYS_GETARGS, buf.as_mut_ptr() as u32, buf.len() as u32, 0) }
}

pub fn vidmap(screen_start: &mut *mut u16) -> i32 {
    unsafe { syscall(SYS_VIDMAP, screen_start as *mut *mut u16 as u32, 0, 0) }
}

pub fn set_handler(signum: i32, handler: usize) -> i32 {
    unsafe { syscall(SYS_SET_HANDLER, signum as u32, handler as u32, 0) }
}

pub fn sigreturn() -> i32 {
    unsafe { syscall(SYS_SIGRETURN, 0, 0, 0) }
}

pub fn print(s: &[u8]) {
    let _ = write(STDOUT, s);
}

/// Bytes of `buf` up to its first NUL.
pub fn until_nul(buf: &[u8]) -> &[u8] {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..len]
}

/// Decimal rendering of `n` into `buf`, returning the used tail.
pub fn format_int(n: i32, buf: &mut [u8; 12]) -> &[u8] {
    let mut i = buf.len();
    let negative = n < 0;
    let mut v = n.unsigned_abs();
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if negative {
        i -= 1;
        buf[i] = b'-';
    }
    &buf[i..]
}
