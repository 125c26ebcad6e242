#![no_std]
#![no_main]

use core::panic::PanicInfo;

use userland::{close, halt, open, print, read};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let fd = open(b".\0");
    if fd < 0 {
        print(b"directory open failed\n");
        halt(2);
    }
    let mut name = [0u8; 33];
    loop {
        let n = read(fd, &mut name[..32]);
        if n < 0 {
            print(b"directory entry read failed\n");
            halt(3);
        }
        if n == 0 {
            break;
        }
        print(&name[..n as usize]);
        print(b"\n");
    }
    close(fd);
    halt(0)
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    halt(255)
}
