// main.rs
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod boot {
    use core::ffi::{c_char, CStr};
    use core::panic::PanicInfo;
    use core::ptr::addr_of_mut;
    use core::slice;

    use log::{error, info, warn};

    use strata::arch::{self, x86};
    use strata::config::{KernelConfig, DEFAULT_PIT_HZ, KERNEL_MEM_END, VIDEO_PHYS};
    use strata::context::X86Cpu;
    use strata::fs::FileSystem;
    use strata::interrupts::{self, IRQ_KEYBOARD, IRQ_PIT, IRQ_RTC};
    use strata::paging::PageTables;
    use strata::pcb::KernelStacks;
    use strata::rtc::Rtc;
    use strata::system::{Kernel, System, SYSTEM};
    use strata::vga::Console;
    use strata::{logger, pit};

    const MULTIBOOT_MAGIC: u32 = 0x2BAD_B002;
    const FLAG_CMDLINE: u32 = 1 << 2;
    const FLAG_MODS: u32 = 1 << 3;

    static mut PAGE_TABLES: PageTables = PageTables::new();
    static CONSOLE: Console = Console::new(VIDEO_PHYS);
    static RTC: Rtc = Rtc::new();

    struct BootInfo {
        cmdline: &'static str,
        fs_image: Option<&'static [u8]>,
    }

    /// Reads the command line and the first module out of the multiboot
    /// information block.
    unsafe fn parse_multiboot(info: *const u32) -> BootInfo {
        let flags = info.read();
        let mut boot = BootInfo { cmdline: "", fs_image: None };
        if flags & FLAG_CMDLINE != 0 {
            let ptr = info.add(4).read() as usize as *const c_char;
            boot.cmdline = CStr::from_ptr(ptr).to_str().unwrap_or("");
        }
        if flags & FLAG_MODS != 0 && info.add(5).read() > 0 {
            let module = info.add(6).read() as usize as *const u32;
            let start = module.read() as usize;
            let end = module.add(1).read() as usize;
            boot.fs_image = Some(slice::from_raw_parts(start as *const u8, end - start));
        }
        boot
    }

    fn stop(reason: &str) -> ! {
        error!("boot failed: {}", reason);
        loop {
            arch::idle();
        }
    }

    #[no_mangle]
    pub extern "C" fn kernel_main(magic: u32, info: *const u32) -> ! {
        let boot = unsafe { parse_multiboot(info) };
        let parsed = KernelConfig::parse(boot.cmdline);
        let config = parsed.unwrap_or_default();
        logger::init(config.log_level);
        if let Err(e) = parsed {
            warn!("bad boot options ({}), using defaults", e);
        }
        if magic != MULTIBOOT_MAGIC {
            warn!("unexpected boot magic {:#x}", magic);
        }

        unsafe { x86::load_gdt() };
        interrupts::install();

        let Some(image) = boot.fs_image else {
            stop("no filesystem module");
        };
        let fs = match FileSystem::new(image) {
            Ok(fs) => fs,
            Err(_) => stop("filesystem image is malformed"),
        };

        let tables = unsafe { &mut *addr_of_mut!(PAGE_TABLES) };
        let stacks = unsafe { KernelStacks::new(KERNEL_MEM_END) };
        let mut kernel = Kernel::new(tables, stacks);
        kernel.init_paging(&X86Cpu);
        let system = SYSTEM.call_once(|| System::new(X86Cpu, kernel, fs, &CONSOLE, &RTC, config));

        if !pit::init(config.pit_hz) {
            warn!("pit rejected {} Hz, using {} Hz", config.pit_hz, DEFAULT_PIT_HZ);
            pit::init(DEFAULT_PIT_HZ);
        }
        interrupts::enable_irq(IRQ_PIT);
        interrupts::enable_irq(IRQ_KEYBOARD);
        match RTC.init() {
            Ok(()) => interrupts::enable_irq(IRQ_RTC),
            Err(e) => {
                warn!("rtc init: {}", e);
                interrupts::disable_irq(IRQ_RTC);
            }
        }
        info!("strata up: {} Hz tick, {} terminals", config.pit_hz, config.terminals);

        if let Err(e) = system.launch_root_shell(0) {
            error!("first shell: {}", e);
        }
        loop {
            arch::idle();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        x86::disable_interrupts();
        error!("*** PANIC *** {}", info);
        loop {
            x86::hlt();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("strata is a kernel image; build it with --target i686-kernel.json");
}
