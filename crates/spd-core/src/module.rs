//! Memory module and programmer capability types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;

/// Memory generation as seen by detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    NotDetected,
    /// DDR3 or any other single-page EEPROM.
    Ddr3OrOther,
    Ddr4,
    Ddr5,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::NotDetected => write!(f, "not detected"),
            ModuleType::Ddr3OrOther => write!(f, "DDR3/other"),
            ModuleType::Ddr4 => write!(f, "DDR4"),
            ModuleType::Ddr5 => write!(f, "DDR5"),
        }
    }
}

/// Result of a detection pass on one SPD address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub address: u8,
    pub kind: ModuleType,
    /// Image size in bytes: 0, 256, 512 or 1024.
    pub size: usize,
}

impl ModuleInfo {
    pub fn not_detected(address: u8) -> Self {
        Self {
            address,
            kind: ModuleType::NotDetected,
            size: 0,
        }
    }

    pub fn new(address: u8, kind: ModuleType, size: usize) -> Self {
        Self {
            address,
            kind,
            size,
        }
    }

    pub fn is_present(&self) -> bool {
        self.kind != ModuleType::NotDetected
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}: {} ({} bytes)", self.address, self.kind, self.size)
    }
}

/// Map an SPD_SIZE code to bytes. Codes outside 0..=3 are invalid.
pub fn size_from_code(code: u8) -> Option<usize> {
    match code {
        0 => Some(0),
        1 => Some(DDR3_SPD_SIZE),
        2 => Some(DDR4_SPD_SIZE),
        3 => Some(DDR5_SPD_SIZE),
        _ => None,
    }
}

/// Reversible write protection support reported by the programmer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RswpSupport {
    pub ddr3: bool,
    pub ddr4: bool,
    pub ddr5: bool,
}

impl RswpSupport {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            ddr3: bits & RSWP_SUPPORT_DDR3 != 0,
            ddr4: bits & RSWP_SUPPORT_DDR4 != 0,
            ddr5: bits & RSWP_SUPPORT_DDR5 != 0,
        }
    }

    pub fn supports(&self, kind: ModuleType) -> bool {
        match kind {
            ModuleType::Ddr3OrOther => self.ddr3,
            ModuleType::Ddr4 => self.ddr4,
            ModuleType::Ddr5 => self.ddr5,
            ModuleType::NotDetected => false,
        }
    }
}

/// I2C bus clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    /// 100 kHz
    Standard,
    /// 400 kHz
    Fast,
}

impl ClockMode {
    pub fn as_byte(self) -> u8 {
        match self {
            ClockMode::Standard => 0,
            ClockMode::Fast => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ClockMode::Standard),
            1 => Some(ClockMode::Fast),
            _ => None,
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::Standard => write!(f, "standard (100 kHz)"),
            ClockMode::Fast => write!(f, "fast (400 kHz)"),
        }
    }
}

/// Programmer control pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pin {
    OfflineMode,
    /// SA1 address select.
    Sa1,
    /// 9 V on SA0, needed for DDR4 RSWP.
    HighVoltage,
}

impl Pin {
    pub fn as_byte(self) -> u8 {
        match self {
            Pin::OfflineMode => 0,
            Pin::Sa1 => 1,
            Pin::HighVoltage => 9,
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pin::OfflineMode => write!(f, "offline mode"),
            Pin::Sa1 => write!(f, "SA1"),
            Pin::HighVoltage => write!(f, "high voltage"),
        }
    }
}
