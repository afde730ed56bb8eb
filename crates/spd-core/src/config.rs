//! Programmer configuration.
//!
//! Every field has a default, so a partial TOML table deserializes fine.
//! Durations are stored as milliseconds to keep config files readable.
//! Timing and retry values were tuned on real hardware and may need
//! adjusting for slow modules or long cables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a programmer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgrammerConfig {
    /// Serial port baud rate.
    pub baud_rate: u32,
    /// Wait after opening the port while the firmware boots.
    pub boot_delay_ms: u64,
    pub timeouts: Timeouts,
    pub paging: PagingConfig,
}

impl Default for ProgrammerConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            boot_delay_ms: 2000,
            timeouts: Timeouts::default(),
            paging: PagingConfig::default(),
        }
    }
}

impl ProgrammerConfig {
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    /// Zero delays and short timeouts, for simulated devices.
    pub fn for_testing() -> Self {
        Self {
            boot_delay_ms: 0,
            timeouts: Timeouts {
                response_ms: 50,
                slow_response_ms: 50,
                frame_ms: 10,
                alert_code_ms: 5,
                write_ms: 50,
            },
            paging: PagingConfig {
                backoff_ms: 0,
                page_settle_ms: 0,
                ddr4_boundary_delay_ms: 0,
                ..PagingConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Per-exchange time budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Overall wait for a reply marker.
    pub response_ms: u64,
    /// Overall wait for commands that program EEPROM cells or rescan the bus.
    pub slow_response_ms: u64,
    /// Budget for each of the length, payload and checksum phases.
    pub frame_ms: u64,
    /// Budget for the code byte after an alert marker.
    pub alert_code_ms: u64,
    /// Budget for queueing a command.
    pub write_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response_ms: 1000,
            slow_response_ms: 5000,
            frame_ms: 100,
            alert_code_ms: 10,
            write_ms: 1000,
        }
    }
}

impl Timeouts {
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.slow_response_ms)
    }

    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }

    pub fn alert_code(&self) -> Duration {
        Duration::from_millis(self.alert_code_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

/// Whole-image chunking, retry and settling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Read chunk for DDR3/DDR4 (max 64).
    pub read_chunk: usize,
    /// Read sub-chunk inside a DDR5 page.
    pub ddr5_read_chunk: usize,
    /// Page write chunk (max 16).
    pub write_chunk: usize,
    /// Attempts per chunk for DDR3/DDR4.
    pub retries: u32,
    /// Attempts per chunk for DDR5 pages.
    pub ddr5_retries: u32,
    /// Base backoff; attempt n waits n times this.
    pub backoff_ms: u64,
    /// Wait after writing the DDR5 page register.
    pub page_settle_ms: u64,
    /// Extra wait when a DDR4 write enters the upper page.
    pub ddr4_boundary_delay_ms: u64,
    /// Chunks allowed to fall back to byte writes before the write aborts.
    pub max_write_errors: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            read_chunk: 64,
            ddr5_read_chunk: 32,
            write_chunk: 16,
            retries: 3,
            ddr5_retries: 5,
            backoff_ms: 20,
            page_settle_ms: 10,
            ddr4_boundary_delay_ms: 50,
            max_write_errors: 3,
        }
    }
}

impl PagingConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    pub fn ddr4_boundary_delay(&self) -> Duration {
        Duration::from_millis(self.ddr4_boundary_delay_ms)
    }
}
