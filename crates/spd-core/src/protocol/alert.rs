//! Asynchronous device alerts and their dispatch.

use std::fmt;

use tracing::{debug, info};

use super::constants::*;
use crate::events::{SpdEvent, SpdObserver};

/// Interpreted alert code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    /// Device (re)booted and is accepting commands.
    Ready,
    SlaveCountIncreased,
    SlaveCountDecreased,
    ClockIncreased,
    ClockDecreased,
    Unknown(u8),
}

impl Alert {
    pub fn from_code(code: u8) -> Self {
        match code {
            ALERT_READY => Alert::Ready,
            ALERT_SLAVE_INC => Alert::SlaveCountIncreased,
            ALERT_SLAVE_DEC => Alert::SlaveCountDecreased,
            ALERT_CLOCK_INC => Alert::ClockIncreased,
            ALERT_CLOCK_DEC => Alert::ClockDecreased,
            other => Alert::Unknown(other),
        }
    }

    /// Whether the set of modules on the bus changed.
    pub fn is_bus_change(&self) -> bool {
        matches!(self, Alert::SlaveCountIncreased | Alert::SlaveCountDecreased)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::Ready => write!(f, "device ready"),
            Alert::SlaveCountIncreased => write!(f, "module added"),
            Alert::SlaveCountDecreased => write!(f, "module removed"),
            Alert::ClockIncreased => write!(f, "bus clock increased"),
            Alert::ClockDecreased => write!(f, "bus clock decreased"),
            Alert::Unknown(code) => write!(f, "unknown alert 0x{:02X}", code),
        }
    }
}

/// Hands alerts read off the wire to the registered observer.
///
/// Runs on the thread that holds the link; observers must not issue
/// commands from `on_event`.
pub struct AlertDispatcher<'a, O: SpdObserver + ?Sized> {
    observer: &'a O,
}

impl<'a, O: SpdObserver + ?Sized> AlertDispatcher<'a, O> {
    pub fn new(observer: &'a O) -> Self {
        Self { observer }
    }

    pub fn dispatch(&self, code: u8) -> Alert {
        let alert = Alert::from_code(code);
        match alert {
            Alert::Unknown(_) => debug!(code = %format!("0x{:02X}", code), "Unrecognized alert"),
            _ => info!(alert = %alert, "Device alert"),
        }
        self.observer.on_event(&SpdEvent::Alert { code, alert });
        alert
    }
}
