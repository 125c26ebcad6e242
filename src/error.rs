// error.rs
use core::fmt;

/// Every failure a kernel operation can report. User space only ever sees
/// the sentinel `-1`; the variant is kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    OutOfRange,
    Exhausted,
    InvalidDescriptor,
    NotFound,
    NotExecutable,
    NullArgument,
    InvalidArgument,
    Unsupported,
    InvalidState,
}

pub type KResult<T> = Result<T, KernelError>;

impl KernelError {
    pub const fn sentinel(self) -> i32 {
        -1
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfRange => "value out of range",
            KernelError::Exhausted => "no free process slot",
            KernelError::InvalidDescriptor => "bad file descriptor",
            KernelError::NotFound => "no such file",
            KernelError::NotExecutable => "not an executable",
            KernelError::NullArgument => "null pointer argument",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::Unsupported => "operation not supported by device",
            KernelError::InvalidState => "illegal process state transition",
        };
        f.write_str(msg)
    }
}

/// Collapses a kernel result into the integer handed back in `eax`.
pub fn to_user(result: KResult<i32>) -> i32 {
    result.unwrap_or_else(KernelError::sentinel)
}
