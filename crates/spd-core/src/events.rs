//! Event system for UI decoupling.
//!
//! Allows CLI/GUI front ends to subscribe to device alerts and operation
//! progress without tight coupling to the core logic.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::protocol::Alert;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Serial packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the programmer.
#[derive(Debug, Clone, PartialEq)]
pub enum SpdEvent {
    /// Link opened and the device answered a ping.
    Connected { port: String },
    /// Link closed.
    Disconnected,
    /// Unsolicited device notification.
    Alert { code: u8, alert: Alert },
    /// Whole-image progress.
    Progress {
        operation: String,
        current: usize,
        total: usize,
    },
    /// DDR5 page register written.
    PageSelected { address: u8, page: u8 },
    /// DDR4 write crossed into the upper page.
    BoundaryDelay { offset: usize, delay_ms: u64 },
    /// A chunk attempt failed and will be retried.
    Retry {
        offset: usize,
        attempt: u32,
        error: String,
    },
    /// Page write gave up; writing the chunk byte by byte.
    ByteFallback { offset: usize, len: usize },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Frame sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
}

/// Observer trait for receiving programmer events.
///
/// Called synchronously from whichever thread drives the serial link while
/// it holds the link. Implementations must not issue commands on the same
/// programmer; queue work for later instead.
pub trait SpdObserver: Send + Sync {
    fn on_event(&self, event: &SpdEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SpdObserver for NullObserver {
    fn on_event(&self, _event: &SpdEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SpdObserver for TracingObserver {
    fn on_event(&self, event: &SpdEvent) {
        match event {
            SpdEvent::Connected { port } => {
                tracing::info!(port = %port, "Programmer connected");
            }
            SpdEvent::Disconnected => {
                tracing::info!("Programmer disconnected");
            }
            SpdEvent::Alert { code, alert } => {
                tracing::info!(code = %format!("0x{:02X}", code), alert = %alert, "Alert");
            }
            SpdEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            SpdEvent::PageSelected { address, page } => {
                tracing::debug!(address = %format!("0x{:02X}", address), page, "Page selected");
            }
            SpdEvent::BoundaryDelay { offset, delay_ms } => {
                tracing::debug!(offset, delay_ms, "Page boundary settle");
            }
            SpdEvent::Retry {
                offset,
                attempt,
                error,
            } => {
                tracing::warn!(offset = %format!("0x{:04X}", offset), attempt, "Retrying chunk: {}", error);
            }
            SpdEvent::ByteFallback { offset, len } => {
                tracing::warn!(offset = %format!("0x{:04X}", offset), len, "Falling back to byte writes");
            }
            SpdEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            SpdEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "Serial packet");
            }
        }
    }
}

/// Forwards every event into an mpsc channel.
pub struct ChannelObserver {
    sender: Mutex<Sender<SpdEvent>>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<SpdEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl SpdObserver for ChannelObserver {
    fn on_event(&self, event: &SpdEvent) {
        if let Ok(sender) = self.sender.lock() {
            // A dropped receiver only means nobody is listening.
            let _ = sender.send(event.clone());
        }
    }
}

/// Alert subscription: delivers `(code, meaning)` pairs and nothing else.
pub struct AlertChannel {
    sender: Mutex<Sender<(u8, Alert)>>,
}

impl AlertChannel {
    pub fn new() -> (Self, Receiver<(u8, Alert)>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl SpdObserver for AlertChannel {
    fn on_event(&self, event: &SpdEvent) {
        if let SpdEvent::Alert { code, alert } = event
            && let Ok(sender) = self.sender.lock()
        {
            let _ = sender.send((*code, *alert));
        }
    }
}

/// Keeps every event in memory. Handy for tests and post-mortem dumps.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SpdEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SpdEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn alerts(&self) -> Vec<(u8, Alert)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SpdEvent::Alert { code, alert } => Some((code, alert)),
                _ => None,
            })
            .collect()
    }
}

impl SpdObserver for RecordingObserver {
    fn on_event(&self, event: &SpdEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
