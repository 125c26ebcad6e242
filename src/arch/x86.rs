// arch/x86.rs
//! i686 instructions and descriptor tables.

use core::arch::asm;
use core::mem::size_of;
use core::ptr::{addr_of, addr_of_mut};

pub const KERNEL_CS: u16 = 0x10;
pub const KERNEL_DS: u16 = 0x18;
pub const USER_CS: u16 = 0x23;
pub const USER_DS: u16 = 0x2B;
pub const TSS_SELECTOR: u16 = 0x30;

/// Present, ring 0, 32-bit interrupt gate.
pub const INTERRUPT_GATE: u8 = 0x8E;
/// Present, ring 3 callable, 32-bit trap gate (interrupts stay enabled).
pub const USER_TRAP_GATE: u8 = 0xEF;

const EFLAGS_IF: u32 = 0x200;
const TSS_WORDS: usize = 26;

#[inline(always)]
pub unsafe fn outb(port: u16, val: u8) {
    asm!("out dx, al", in("dx") port, in("al") val, options(nostack, preserves_flags));
}

#[inline(always)]
pub unsafe fn inb(port: u16) -> u8 {
    let val: u8;
    asm!("in al, dx", out("al") val, in("dx") port, options(nostack, preserves_flags));
    val
}

#[inline(always)]
pub fn hlt() {
    unsafe { asm!("hlt", options(nomem, nostack, preserves_flags)) };
}

#[inline(always)]
pub fn disable_interrupts() {
    unsafe { asm!("cli", options(nomem, nostack)) };
}

#[inline(always)]
pub fn enable_interrupts() {
    unsafe { asm!("sti", options(nomem, nostack)) };
}

pub fn interrupts_enabled() -> bool {
    let flags: u32;
    unsafe { asm!("pushfd", "pop {}", out(reg) flags, options(nomem, preserves_flags)) };
    flags & EFLAGS_IF != 0
}

pub fn stack_pointer() -> usize {
    let sp: usize;
    unsafe { asm!("mov {}, esp", out(reg) sp, options(nomem, nostack, preserves_flags)) };
    sp
}

/// Faulting linear address of the last page fault.
pub fn read_cr2() -> usize {
    let cr2: usize;
    unsafe { asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags)) };
    cr2
}

/// Loads CR3 and makes sure 4MB pages, global pages and paging are on.
pub unsafe fn enable_paging(directory: u32, cr4_bits: u32, cr0_bits: u32) {
    asm!(
        "mov cr3, {dir}",
        "mov {tmp}, cr4",
        "or {tmp}, {cr4}",
        "mov cr4, {tmp}",
        "mov {tmp}, cr0",
        "or {tmp}, {cr0}",
        "mov cr0, {tmp}",
        dir = in(reg) directory,
        cr4 = in(reg) cr4_bits,
        cr0 = in(reg) cr0_bits,
        tmp = out(reg) _,
        options(nostack, preserves_flags),
    );
}

#[repr(C, packed)]
struct DescriptorPointer {
    limit: u16,
    base: u32,
}

// null, unused, kernel code, kernel data, user code, user data, tss
static mut GDT: [u64; 7] = [
    0,
    0,
    0x00CF_9A00_0000_FFFF,
    0x00CF_9200_0000_FFFF,
    0x00CF_FA00_0000_FFFF,
    0x00CF_F200_0000_FFFF,
    0,
];

static mut TSS: [u32; TSS_WORDS] = [0; TSS_WORDS];

static mut IDT: [u64; 256] = [0; 256];

const fn tss_descriptor(base: u32, limit: u32) -> u64 {
    (limit & 0xFFFF) as u64
        | ((base & 0x00FF_FFFF) as u64) << 16
        | 0x89u64 << 40
        | (((limit >> 16) & 0xF) as u64) << 48
        | ((base >> 24) as u64) << 56
}

const fn gate(handler: u32, flags: u8) -> u64 {
    (handler & 0xFFFF) as u64
        | (KERNEL_CS as u64) << 16
        | (flags as u64) << 40
        | ((handler >> 16) as u64) << 48
}

/// Installs the flat segments and the task state segment.
pub unsafe fn load_gdt() {
    let tss = addr_of_mut!(TSS) as *mut u32;
    tss.add(2).write(KERNEL_DS as u32);
    // I/O bitmap offset past the limit: no port access from ring 3
    tss.add(TSS_WORDS - 1).write(((TSS_WORDS * 4) as u32) << 16);

    let gdt = addr_of_mut!(GDT) as *mut u64;
    gdt.add(6)
        .write(tss_descriptor(tss as u32, (TSS_WORDS * 4 - 1) as u32));

    let ptr = DescriptorPointer {
        limit: (size_of::<[u64; 7]>() - 1) as u16,
        base: addr_of!(GDT) as u32,
    };
    asm!("lgdt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
    asm!(
        "push {cs}",
        "lea {tmp}, [55f]",
        "push {tmp}",
        "retf",
        "55:",
        "mov ds, {ds:x}",
        "mov es, {ds:x}",
        "mov fs, {ds:x}",
        "mov gs, {ds:x}",
        "mov ss, {ds:x}",
        cs = in(reg) KERNEL_CS as u32,
        ds = in(reg) KERNEL_DS as u32,
        tmp = out(reg) _,
    );
    asm!("ltr {:x}", in(reg) TSS_SELECTOR, options(nostack, preserves_flags));
}

/// Kernel stack the CPU switches to on a ring 3 to ring 0 transition.
pub fn set_kernel_stack(esp0: u32) {
    unsafe { (addr_of_mut!(TSS) as *mut u32).add(1).write_volatile(esp0) };
}

pub unsafe fn set_gate(vector: u8, handler: u32, flags: u8) {
    (addr_of_mut!(IDT) as *mut u64)
        .add(vector as usize)
        .write(gate(handler, flags));
}

pub unsafe fn load_idt() {
    let ptr = DescriptorPointer {
        limit: (size_of::<[u64; 256]>() - 1) as u16,
        base: addr_of!(IDT) as u32,
    };
    asm!("lidt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
}
