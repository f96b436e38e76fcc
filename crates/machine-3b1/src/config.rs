//! Configuration for the 3B1 machine crate.

use std::fmt;

/// Largest loadable boot ROM: the 0x800000 window decodes 256 KiB.
pub const ROM_MAX: usize = 256 * 1024;
/// Installed base RAM ceiling (motherboard limit).
pub const BASE_RAM_MAX: usize = 2 * 1024 * 1024;
/// Installed expansion RAM ceiling (one full combo card set).
pub const EXP_RAM_MAX: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Boot ROM contents, mapped at 0x800000 and mirrored through the
    /// window.
    pub rom: Vec<u8>,
    pub base_ram_size: usize,
    pub exp_ram_size: usize,
}

impl SystemConfig {
    /// Standard machine: a full 2 MiB of base RAM, no expansion card.
    #[must_use]
    pub fn new(rom: Vec<u8>) -> Self {
        Self {
            rom,
            base_ram_size: BASE_RAM_MAX,
            exp_ram_size: 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        // All stores are addressed through a size mask, so sizes must be
        // powers of 2.
        if self.rom.is_empty() || self.rom.len() > ROM_MAX || !self.rom.len().is_power_of_two() {
            return Err(ConfigError::RomSize(self.rom.len()));
        }
        if self.base_ram_size == 0
            || self.base_ram_size > BASE_RAM_MAX
            || !self.base_ram_size.is_power_of_two()
        {
            return Err(ConfigError::BaseRamSize(self.base_ram_size));
        }
        if self.exp_ram_size > EXP_RAM_MAX
            || (self.exp_ram_size != 0 && !self.exp_ram_size.is_power_of_two())
        {
            return Err(ConfigError::ExpRamSize(self.exp_ram_size));
        }
        Ok(())
    }
}

/// Reasons a machine cannot be built from a configuration.
#[derive(Debug)]
pub enum ConfigError {
    RomSize(usize),
    BaseRamSize(usize),
    ExpRamSize(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomSize(n) => write!(
                f,
                "ROM size {n} bytes: must be a power of 2, at most {ROM_MAX}"
            ),
            Self::BaseRamSize(n) => write!(
                f,
                "base RAM size {n} bytes: must be a power of 2, at most {BASE_RAM_MAX}"
            ),
            Self::ExpRamSize(n) => write!(
                f,
                "expansion RAM size {n} bytes: must be 0 or a power of 2, at most {EXP_RAM_MAX}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
