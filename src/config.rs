// config.rs
//! Memory layout constants and the boot command-line configuration.

use core::fmt;
use core::str::FromStr;

use log::{warn, LevelFilter};

/// PIDs are 0..MAX_PID; PID 0 is the boot context and never allocated.
pub const MAX_PID: usize = 16;

/// Top of the kernel 4MB page; the per-PID kernel stacks grow down from here.
pub const KERNEL_MEM_END: usize = 0x0080_0000;
pub const KERNEL_STACK_SIZE: usize = 0x2000;
/// Physical base of the 4MB kernel page (directory entry 1).
pub const KERNEL_PAGE_BASE: usize = 0x0040_0000;

pub const FD_MIN: i32 = 0;
pub const FD_MAX: i32 = 8;
pub const FD_COUNT: usize = FD_MAX as usize;
pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;

pub const ARGS_MAX: usize = 128;
pub const FILENAME_MAX: usize = 32;

pub const LARGE_PAGE_SIZE: usize = 0x0040_0000;
pub const PAGE_SIZE: usize = 0x1000;

/// User program window: directory entry 32, one 4MB page per PID.
pub const PROGRAM_VIRT_BASE: usize = 0x0800_0000;
pub const PROGRAM_DIR_INDEX: usize = PROGRAM_VIRT_BASE / LARGE_PAGE_SIZE;
pub const PROGRAM_LOAD_ADDR: usize = 0x0804_8000;
pub const PROGRAM_IMAGE_MAX: usize = PROGRAM_VIRT_BASE + LARGE_PAGE_SIZE - PROGRAM_LOAD_ADDR;
pub const USER_STACK: usize = 0x083F_FFFC;

pub const VIDEO_PHYS: usize = 0xB8000;
pub const VIDEO_PAGE_INDEX: usize = VIDEO_PHYS / PAGE_SIZE;
pub const VIDMAP_DIR_INDEX: usize = PROGRAM_DIR_INDEX - 1;
/// Where a process sees video memory after `vidmap`.
pub const VIDMAP_VIRT: usize = VIDMAP_DIR_INDEX * LARGE_PAGE_SIZE + VIDEO_PAGE_INDEX * PAGE_SIZE;

pub const NR_TERM: usize = 4;

pub const DEFAULT_PIT_HZ: u32 = 100;
/// Slowest rate the PIT's 16-bit reload counter can produce.
pub const PIT_HZ_MIN: u32 = 19;
pub const PIT_HZ_MAX: u32 = 1000;
pub const DEFAULT_SHELL: &str = "shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    BadLevel,
    BadRate,
    BadShell,
    BadTerminals,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::BadLevel => write!(f, "unknown log level"),
            ConfigError::BadRate => write!(f, "timer rate must be {}..={}", PIT_HZ_MIN, PIT_HZ_MAX),
            ConfigError::BadShell => write!(f, "shell name empty or too long"),
            ConfigError::BadTerminals => write!(f, "terminal count must be 1..={}", NR_TERM),
        }
    }
}

/// Runtime knobs taken from the multiboot command line, e.g.
/// `log=debug hz=100 shell=shell terms=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub log_level: LevelFilter,
    pub pit_hz: u32,
    pub terminals: usize,
    shell: [u8; FILENAME_MAX],
    shell_len: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let mut shell = [0u8; FILENAME_MAX];
        shell[..DEFAULT_SHELL.len()].copy_from_slice(DEFAULT_SHELL.as_bytes());
        Self {
            log_level: LevelFilter::Info,
            pit_hz: DEFAULT_PIT_HZ,
            terminals: NR_TERM,
            shell,
            shell_len: DEFAULT_SHELL.len(),
        }
    }
}

impl KernelConfig {
    pub fn parse(cmdline: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for token in cmdline.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                // GRUB passes the kernel path as the first word
                continue;
            };
            match key {
                "log" => {
                    cfg.log_level = LevelFilter::from_str(value).map_err(|_| ConfigError::BadLevel)?;
                }
                "hz" => {
                    let hz: u32 = value.parse().map_err(|_| ConfigError::BadRate)?;
                    if !(PIT_HZ_MIN..=PIT_HZ_MAX).contains(&hz) || crate::pit::divisor(hz).is_none() {
                        return Err(ConfigError::BadRate);
                    }
                    cfg.pit_hz = hz;
                }
                "shell" => cfg.set_shell(value.as_bytes())?,
                "terms" => {
                    let n: usize = value.parse().map_err(|_| ConfigError::BadTerminals)?;
                    if !(1..=NR_TERM).contains(&n) {
                        return Err(ConfigError::BadTerminals);
                    }
                    cfg.terminals = n;
                }
                other => warn!("ignoring unknown boot option {}", other),
            }
        }
        Ok(cfg)
    }

    pub fn shell(&self) -> &[u8] {
        &self.shell[..self.shell_len]
    }

    fn set_shell(&mut self, name: &[u8]) -> Result<(), ConfigError> {
        if name.is_empty() || name.len() > FILENAME_MAX {
            return Err(ConfigError::BadShell);
        }
        self.shell = [0; FILENAME_MAX];
        self.shell[..name.len()].copy_from_slice(name);
        self.shell_len = name.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants_match_the_address_map() {
        assert_eq!(PROGRAM_DIR_INDEX, 32);
        assert_eq!(VIDMAP_DIR_INDEX, 31);
        assert_eq!(VIDEO_PAGE_INDEX, 0xB8);
        assert_eq!(VIDMAP_VIRT, 0x07CB_8000);
        assert_eq!(PROGRAM_IMAGE_MAX, 0x3B_8000);
    }

    #[test]
    fn defaults_when_cmdline_is_empty() {
        let cfg = KernelConfig::parse("").unwrap();
        assert_eq!(cfg, KernelConfig::default());
        assert_eq!(cfg.shell(), b"shell");
        assert_eq!(cfg.pit_hz, 100);
    }

    #[test]
    fn every_accepted_rate_programs_the_pit() {
        for hz in [1, 10, 18, PIT_HZ_MIN, 250, PIT_HZ_MAX] {
            if let Ok(cfg) = KernelConfig::parse(&std::format!("hz={}", hz)) {
                assert!(crate::pit::divisor(cfg.pit_hz).is_some(), "hz={}", hz);
            }
        }
        assert_eq!(KernelConfig::parse("hz=19").unwrap().pit_hz, PIT_HZ_MIN);
    }

    #[test]
    fn parses_known_keys_and_skips_the_rest() {
        let cfg = KernelConfig::parse("/boot/strata log=debug hz=250 shell=sh2 terms=2 color=on").unwrap();
        assert_eq!(cfg.log_level, LevelFilter::Debug);
        assert_eq!(cfg.pit_hz, 250);
        assert_eq!(cfg.shell(), b"sh2");
        assert_eq!(cfg.terminals, 2);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(KernelConfig::parse("hz=0"), Err(ConfigError::BadRate));
        assert_eq!(KernelConfig::parse("hz=fast"), Err(ConfigError::BadRate));
        assert_eq!(KernelConfig::parse("hz=10"), Err(ConfigError::BadRate));
        assert_eq!(KernelConfig::parse("hz=1001"), Err(ConfigError::BadRate));
        assert_eq!(KernelConfig::parse("log=loud"), Err(ConfigError::BadLevel));
        assert_eq!(KernelConfig::parse("terms=5"), Err(ConfigError::BadTerminals));
        assert_eq!(KernelConfig::parse("shell="), Err(ConfigError::BadShell));
    }
}
