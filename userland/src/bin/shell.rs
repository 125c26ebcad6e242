#![no_std]
#![no_main]

use core::panic::PanicInfo;

use userland::{execute, format_int, halt, print, read, STDIN};

const PROMPT: &[u8] = b"391OS> ";
const LINE_MAX: usize = 128;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let mut line = [0u8; LINE_MAX + 1];
    loop {
        print(PROMPT);
        let n = read(STDIN, &mut line[..LINE_MAX]);
        if n < 0 {
            print(b"read from keyboard failed\n");
            halt(1);
        }
        let mut len = n as usize;
        if len > 0 && line[len - 1] == b'\n' {
            len -= 1;
        }
        if len == 0 {
            continue;
        }
        if &line[..len] == b"exit" {
            halt(0);
        }
        line[len] = 0;

        match execute(&line[..=len]) {
            -1 => print(b"no such command\n"),
            0 => {}
            status => {
                let mut digits = [0u8; 12];
                print(b"program exited with status ");
                print(format_int(status, &mut digits));
                print(b"\n");
            }
        }
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    print(b"shell panic\n");
    halt(255)
}
