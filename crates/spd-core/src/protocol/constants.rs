//! Protocol constants for the SPD programmer firmware.
//!
//! Opcodes and markers are printable ASCII so that a raw serial capture
//! stays readable.

use std::fmt;

// ============================================================================
// Frame markers (Device -> Host)
// ============================================================================

/// Precedes a length-prefixed, checksummed payload.
pub const RESPONSE_MARKER: u8 = b'&';

/// Precedes a one-byte alert code.
pub const ALERT_MARKER: u8 = b'@';

/// Bare marker, no payload.
pub const READY_MARKER: u8 = b'!';

/// Firmware does not support the requested hardware. No payload.
pub const UNKNOWN_MARKER: u8 = b'?';

// ============================================================================
// Sub-selectors
// ============================================================================

/// Requests the getter variant of a command.
pub const GET: u8 = 0xFF;
pub const ENABLE: u8 = 0x01;
pub const DISABLE: u8 = 0x00;

/// Boolean success payload.
pub const SUCCESS: u8 = 0x01;

// ============================================================================
// Address spaces
// ============================================================================

pub const SPD_ADDRESS_FIRST: u8 = 0x50;
pub const SPD_ADDRESS_LAST: u8 = 0x57;

pub const PMIC_ADDRESS_FIRST: u8 = 0x48;
pub const PMIC_ADDRESS_LAST: u8 = 0x4F;

/// Highest addressable SPD5 hub management register.
pub const HUB_REGISTER_LAST: u8 = 127;

/// MR11 - legacy mode page select.
pub const MR11_PAGE_SELECT: u8 = 0x0B;
/// MR12 - RSWP for blocks 0..7.
pub const MR12_RSWP_LOW: u8 = 0x0C;
/// MR13 - RSWP for blocks 8..15.
pub const MR13_RSWP_HIGH: u8 = 0x0D;

/// Hub registers the host is allowed to write.
pub const WRITABLE_HUB_REGISTERS: &[u8] = &[MR11_PAGE_SELECT, MR12_RSWP_LOW, MR13_RSWP_HIGH];

/// Memory-region bit: selects NVM instead of hub registers in legacy mode.
pub const SPD5_NVM_SELECT: u8 = 0x80;

// ============================================================================
// Size constants
// ============================================================================

/// Largest SPD image (DDR5).
pub const MAX_SPD_SIZE: usize = 1024;
pub const DDR3_SPD_SIZE: usize = 256;
pub const DDR4_SPD_SIZE: usize = 512;
pub const DDR5_SPD_SIZE: usize = 1024;

/// DDR4 page size; offset bit 8 picks the page.
pub const DDR4_PAGE_SIZE: usize = 256;
/// DDR5 logical page size selected through MR11.
pub const DDR5_PAGE_SIZE: usize = 128;

/// SPD_READ_PAGE length limit.
pub const MAX_READ_LENGTH: usize = 64;
/// SPD_WRITE_PAGE length limit.
pub const MAX_WRITE_LENGTH: usize = 16;

/// PMIC register space.
pub const PMIC_REGISTER_SPACE: usize = 256;

/// Longest name the device stores.
pub const MAX_NAME_LENGTH: usize = 16;

/// Highest RSWP block number (DDR5 has 16 blocks).
pub const MAX_RSWP_BLOCK: u8 = 15;

// ============================================================================
// RSWP_REPORT capability bits
// ============================================================================

pub const RSWP_SUPPORT_DDR3: u8 = 1 << 3;
pub const RSWP_SUPPORT_DDR4: u8 = 1 << 4;
pub const RSWP_SUPPORT_DDR5: u8 = 1 << 5;

// ============================================================================
// Alert codes
// ============================================================================

pub const ALERT_READY: u8 = b'!';
pub const ALERT_SLAVE_INC: u8 = b'+';
pub const ALERT_SLAVE_DEC: u8 = b'-';
pub const ALERT_CLOCK_INC: u8 = b'/';
pub const ALERT_CLOCK_DEC: u8 = b'\\';

// ============================================================================
// Opcodes (Host -> Device)
// ============================================================================

/// Command opcodes understood by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Ping = b'0',
    Version = b'v',
    Name = b'n',
    FactoryReset = b'-',
    SpdReadPage = b'r',
    SpdWriteByte = b'w',
    SpdWritePage = b'g',
    SpdWriteTest = b't',
    Ddr4Detect = b'4',
    Ddr5Detect = b'5',
    Spd5HubReg = b'h',
    SpdSize = b'z',
    ScanBus = b's',
    BusClock = b'c',
    ProbeAddress = b'a',
    PinControl = b'p',
    PinReset = b'd',
    Rswp = b'b',
    Pswp = b'l',
    RswpReport = b'f',
    Eeprom = b'e',
}

impl Opcode {
    pub const ALL: [Opcode; 21] = [
        Opcode::Ping,
        Opcode::Version,
        Opcode::Name,
        Opcode::FactoryReset,
        Opcode::SpdReadPage,
        Opcode::SpdWriteByte,
        Opcode::SpdWritePage,
        Opcode::SpdWriteTest,
        Opcode::Ddr4Detect,
        Opcode::Ddr5Detect,
        Opcode::Spd5HubReg,
        Opcode::SpdSize,
        Opcode::ScanBus,
        Opcode::BusClock,
        Opcode::ProbeAddress,
        Opcode::PinControl,
        Opcode::PinReset,
        Opcode::Rswp,
        Opcode::Pswp,
        Opcode::RswpReport,
        Opcode::Eeprom,
    ];

    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_byte() == byte)
    }

    /// Commands that touch EEPROM cells or rescan the bus and need the
    /// slow response budget.
    pub fn is_slow(self) -> bool {
        matches!(
            self,
            Opcode::FactoryReset
                | Opcode::SpdWriteTest
                | Opcode::Pswp
                | Opcode::Rswp
                | Opcode::ScanBus
                | Opcode::PinReset
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Ping => "PING",
            Opcode::Version => "VERSION",
            Opcode::Name => "NAME",
            Opcode::FactoryReset => "FACTORY_RESET",
            Opcode::SpdReadPage => "SPD_READ_PAGE",
            Opcode::SpdWriteByte => "SPD_WRITE_BYTE",
            Opcode::SpdWritePage => "SPD_WRITE_PAGE",
            Opcode::SpdWriteTest => "SPD_WRITE_TEST",
            Opcode::Ddr4Detect => "DDR4_DETECT",
            Opcode::Ddr5Detect => "DDR5_DETECT",
            Opcode::Spd5HubReg => "SPD5_HUB_REG",
            Opcode::SpdSize => "SPD_SIZE",
            Opcode::ScanBus => "SCAN_BUS",
            Opcode::BusClock => "BUS_CLOCK",
            Opcode::ProbeAddress => "PROBE_ADDRESS",
            Opcode::PinControl => "PIN_CONTROL",
            Opcode::PinReset => "PIN_RESET",
            Opcode::Rswp => "RSWP",
            Opcode::Pswp => "PSWP",
            Opcode::RswpReport => "RSWP_REPORT",
            Opcode::Eeprom => "EEPROM",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn is_spd_address(address: u8) -> bool {
    (SPD_ADDRESS_FIRST..=SPD_ADDRESS_LAST).contains(&address)
}

pub fn is_pmic_address(address: u8) -> bool {
    (PMIC_ADDRESS_FIRST..=PMIC_ADDRESS_LAST).contains(&address)
}
