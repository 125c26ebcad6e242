// context.rs
//! The seam between kernel bookkeeping and the processor.
//!
//! Everything that touches control registers, the TSS or the stack
//! pointer goes through [`Cpu`], so scheduling and process lifetime can be
//! driven by a recording implementation under test.

/// Kernel stack and base pointer of a suspended kernel context. The
/// callee-saved registers live on that stack.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    pub esp: usize,
    pub ebp: usize,
}

pub trait Cpu: Sync {
    /// Points CR3 at `directory` with 4MB pages, global pages and paging on.
    fn load_page_directory(&self, directory: usize);

    /// Sets the ring 0 stack used on the next privilege transition.
    fn set_kernel_stack(&self, esp0: usize);

    /// Kernel-writable pointer to `len` bytes at user address `addr` in
    /// the active address space.
    ///
    /// # Safety
    /// The range must be mapped by the loaded directory.
    unsafe fn user_memory(&self, addr: usize, len: usize) -> *mut u8;

    /// Saves the current kernel context into `save` and continues the one
    /// in `load`. Returns when something later switches back to `save`.
    ///
    /// # Safety
    /// `load` must hold a context produced by this routine or `enter_user`.
    unsafe fn context_switch(&self, save: *mut SavedContext, load: *const SavedContext);

    /// Saves the current kernel context into `save` and drops to ring 3
    /// at `entry` with the given user stack. Returns the status handed to
    /// [`Cpu::resume`] when the launched program halts.
    ///
    /// # Safety
    /// The program image must be loaded and its directory active.
    unsafe fn enter_user(&self, save: *mut SavedContext, entry: usize, user_stack: usize) -> i32;

    /// Makes the `enter_user` that saved `load` return `status`. Does not
    /// return on hardware.
    ///
    /// # Safety
    /// `load` must hold a context saved by `enter_user`.
    unsafe fn resume(&self, load: *const SavedContext, status: i32);
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use self::hardware::X86Cpu;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hardware {
    use x86_64::registers::control::{Cr0Flags, Cr4Flags};

    use super::{Cpu, SavedContext};
    use crate::arch::x86;

    const CR0_BITS: u32 = Cr0Flags::PAGING.bits() as u32;
    const CR4_BITS: u32 =
        (Cr4Flags::PAGE_SIZE_EXTENSION.bits() | Cr4Flags::PAGE_GLOBAL.bits()) as u32;

    extern "C" {
        fn context_switch(save: *mut SavedContext, load: *const SavedContext);
        fn enter_user(save: *mut SavedContext, entry: u32, user_stack: u32) -> i32;
        fn resume_context(load: *const SavedContext, status: i32) -> !;
    }

    pub struct X86Cpu;

    impl Cpu for X86Cpu {
        fn load_page_directory(&self, directory: usize) {
            unsafe { x86::enable_paging(directory as u32, CR4_BITS, CR0_BITS) };
        }

        fn set_kernel_stack(&self, esp0: usize) {
            x86::set_kernel_stack(esp0 as u32);
        }

        unsafe fn user_memory(&self, addr: usize, _len: usize) -> *mut u8 {
            addr as *mut u8
        }

        unsafe fn context_switch(&self, save: *mut SavedContext, load: *const SavedContext) {
            context_switch(save, load);
        }

        unsafe fn enter_user(&self, save: *mut SavedContext, entry: usize, user_stack: usize) -> i32 {
            enter_user(save, entry as u32, user_stack as u32)
        }

        unsafe fn resume(&self, load: *const SavedContext, status: i32) {
            resume_context(load, status)
        }
    }
}
