// interrupts.rs
//! 8259 PIC, IDT wiring and the Rust side of every hardware entry stub.

use log::error;

use crate::arch::{self, x86};
use crate::config::KERNEL_MEM_END;
use crate::kb::{self, KEYBOARD};
use crate::pcb::KernelStacks;
use crate::pit;
use crate::system::SYSTEM;

pub const PIC1_COMMAND: u16 = 0x20;
pub const PIC1_DATA: u16 = 0x21;
pub const PIC2_COMMAND: u16 = 0xA0;
pub const PIC2_DATA: u16 = 0xA1;

const PIC_EOI: u8 = 0x20;
const CASCADE_IRQ: u8 = 2;

pub const IRQ_BASE: u8 = 0x20;
pub const IRQ_PIT: u8 = 0;
pub const IRQ_KEYBOARD: u8 = 1;
pub const IRQ_RTC: u8 = 8;
pub const SYSCALL_VECTOR: u8 = 0x80;
const EXCEPTION_COUNT: usize = 20;

const EXCEPTION_NAMES: [&str; EXCEPTION_COUNT] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating-point error",
    "alignment check",
    "machine check",
    "SIMD floating-point error",
];

extern "C" {
    fn pit_entry();
    fn keyboard_entry();
    fn rtc_entry();
    fn syscall_entry();
    static exception_entries: [u32; EXCEPTION_COUNT];
}

/// Remaps the PICs to vectors 0x20..0x30 with every line masked except
/// the cascade.
pub fn remap_pic() {
    unsafe {
        arch::outb(PIC1_COMMAND, 0x11);
        arch::outb(PIC2_COMMAND, 0x11);
        arch::outb(PIC1_DATA, IRQ_BASE);
        arch::outb(PIC2_DATA, IRQ_BASE + 8);
        // tell master there is a slave at IRQ2 (0000 0100)
        arch::outb(PIC1_DATA, 1 << CASCADE_IRQ);
        // tell slave its cascade identity (0000 0010)
        arch::outb(PIC2_DATA, CASCADE_IRQ);
        arch::outb(PIC1_DATA, 0x01);
        arch::outb(PIC2_DATA, 0x01);

        arch::outb(PIC1_DATA, !(1 << CASCADE_IRQ));
        arch::outb(PIC2_DATA, 0xFF);
    }
}

fn mask_port(irq: u8) -> (u16, u8) {
    if irq < 8 {
        (PIC1_DATA, irq)
    } else {
        (PIC2_DATA, irq - 8)
    }
}

pub fn enable_irq(irq: u8) {
    let (port, bit) = mask_port(irq);
    unsafe {
        let mask = arch::inb(port);
        arch::outb(port, mask & !(1 << bit));
    }
}

pub fn disable_irq(irq: u8) {
    let (port, bit) = mask_port(irq);
    unsafe {
        let mask = arch::inb(port);
        arch::outb(port, mask | (1 << bit));
    }
}

/// Send End Of Interrupt to PIC (for IRQs > 7 also send to slave)
pub fn send_eoi(irq: u8) {
    unsafe {
        if irq >= 8 {
            arch::outb(PIC2_COMMAND, PIC_EOI);
        }
        arch::outb(PIC1_COMMAND, PIC_EOI);
    }
}

/// Fills the IDT and loads it. Interrupts stay off until the caller
/// enables them.
pub fn install() {
    unsafe {
        for (vector, &handler) in exception_entries.iter().enumerate() {
            x86::set_gate(vector as u8, handler, x86::INTERRUPT_GATE);
        }
        x86::set_gate(IRQ_BASE + IRQ_PIT, pit_entry as usize as u32, x86::INTERRUPT_GATE);
        x86::set_gate(IRQ_BASE + IRQ_KEYBOARD, keyboard_entry as usize as u32, x86::INTERRUPT_GATE);
        x86::set_gate(IRQ_BASE + IRQ_RTC, rtc_entry as usize as u32, x86::INTERRUPT_GATE);
        x86::set_gate(SYSCALL_VECTOR, syscall_entry as usize as u32, x86::USER_TRAP_GATE);
        x86::load_idt();
    }
    remap_pic();
}

#[no_mangle]
extern "C" fn pit_interrupt() {
    // acknowledge first: the tick may not come back here for a while
    send_eoi(IRQ_PIT);
    pit::tick();
    if let Some(system) = SYSTEM.get() {
        system.timer_tick();
    }
}

#[no_mangle]
extern "C" fn keyboard_interrupt() {
    let scancode = unsafe { arch::inb(kb::DATA_PORT) };
    if let Some(system) = SYSTEM.get() {
        KEYBOARD.lock().feed(system.console(), system.config().terminals, scancode);
    }
    send_eoi(IRQ_KEYBOARD);
}

#[no_mangle]
extern "C" fn rtc_interrupt() {
    if let Some(system) = SYSTEM.get() {
        system.rtc().interrupt();
    }
    send_eoi(IRQ_RTC);
}

#[no_mangle]
extern "C" fn syscall_handler(number: u32, a1: u32, a2: u32, a3: u32) -> i32 {
    match SYSTEM.get() {
        Some(system) => unsafe { system.dispatch(number, a1 as usize, a2 as usize, a3 as usize) },
        None => -1,
    }
}

#[no_mangle]
extern "C" fn exception_interrupt(vector: u32) -> ! {
    // no locks here: the fault may have happened while one was held
    let stacks = unsafe { KernelStacks::new(KERNEL_MEM_END) };
    let pid = stacks.owner_of(x86::stack_pointer());
    let name = EXCEPTION_NAMES.get(vector as usize).copied().unwrap_or("unknown");
    if vector == 14 {
        error!("{} at {:#x} in pid {:?}", name, x86::read_cr2(), pid);
    } else {
        error!("{} (vector {}) in pid {:?}", name, vector, pid);
    }
    loop {
        arch::idle();
    }
}
