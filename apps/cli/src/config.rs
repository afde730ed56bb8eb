//! Optional TOML settings file.
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//!
//! [programmer]
//! baud_rate = 115200
//! boot_delay_ms = 2000
//!
//! [programmer.paging]
//! retries = 5
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use spd_core::ProgrammerConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub port: Option<String>,
    pub programmer: ProgrammerConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
