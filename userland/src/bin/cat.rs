#![no_std]
#![no_main]

use core::panic::PanicInfo;

use userland::{close, getargs, halt, open, print, read, until_nul};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let mut args = [0u8; 129];
    if getargs(&mut args) != 0 || until_nul(&args).is_empty() {
        print(b"usage: cat <file>\n");
        halt(2);
    }
    let fd = open(&args);
    if fd < 0 {
        print(b"file open failed\n");
        halt(2);
    }
    let mut buf = [0u8; 1024];
    loop {
        let n = read(fd, &mut buf);
        if n < 0 {
            print(b"file read failed\n");
            halt(3);
        }
        if n == 0 {
            break;
        }
        print(&buf[..n as usize]);
    }
    close(fd);
    halt(0)
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    halt(255)
}
