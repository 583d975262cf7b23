//! Register access.
//!
//! Two address spaces: shell registers (device-wide configuration, small
//! index) and soft registers (image-defined, 64-bit address). Reads and
//! writes are direct pass-throughs; nothing is cached.
//!
//! `set_pcie_enabled` is a read-modify-write of the config register and is
//! NOT atomic. Callers changing configuration concurrently must serialize
//! among themselves.

use accel_core::constants::{CONFIG_REGISTER, PCIE_ENABLE_MASK};
use accel_core::driver::NativeDriver;
use accel_core::error::Result;

use crate::device::{Device, Session};

impl<D: NativeDriver> Session<D> {
    pub fn read_shell(&self, index: u32) -> Result<u32> {
        let mut value = 0u32;
        self.check(self.driver().read_shell_register(self.handle(), index, &mut value))?;
        Ok(value)
    }

    pub fn write_shell(&self, index: u32, value: u32) -> Result<()> {
        self.check(self.driver().write_shell_register(self.handle(), index, value))
    }

    pub fn read_soft(&self, address: u64) -> Result<u64> {
        let mut value = 0u64;
        self.check(self.driver().read_soft_register(self.handle(), address, &mut value))?;
        Ok(value)
    }

    pub fn write_soft(&self, address: u64, value: u64) -> Result<()> {
        self.check(self.driver().write_soft_register(self.handle(), address, value))
    }

    pub fn pcie_enabled(&self) -> Result<bool> {
        Ok(self.read_shell(CONFIG_REGISTER)? & PCIE_ENABLE_MASK != 0)
    }

    pub fn set_pcie_enabled(&self, enabled: bool) -> Result<()> {
        let current = self.read_shell(CONFIG_REGISTER)?;
        let next = if enabled {
            current | PCIE_ENABLE_MASK
        } else {
            current & !PCIE_ENABLE_MASK
        };
        self.write_shell(CONFIG_REGISTER, next)
    }
}

impl<D: NativeDriver> Device<D> {
    pub fn read_shell(&self, index: u32) -> Result<u32> {
        self.with_session(|s| s.read_shell(index))
    }

    pub fn write_shell(&self, index: u32, value: u32) -> Result<()> {
        self.with_session(|s| s.write_shell(index, value))
    }

    pub fn read_soft(&self, address: u64) -> Result<u64> {
        self.with_session(|s| s.read_soft(address))
    }

    pub fn write_soft(&self, address: u64, value: u64) -> Result<()> {
        self.with_session(|s| s.write_soft(address, value))
    }

    pub fn pcie_enabled(&self) -> Result<bool> {
        self.with_session(|s| s.pcie_enabled())
    }

    pub fn set_pcie_enabled(&self, enabled: bool) -> Result<()> {
        self.with_session(|s| s.set_pcie_enabled(enabled))
    }
}
