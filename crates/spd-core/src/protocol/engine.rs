//! Request/response engine over a serial transport.
//!
//! The device multiplexes replies and unsolicited alerts on one stream.
//! `receive` keeps reading marker bytes until it sees a frame that answers
//! the outstanding request, handing any alerts it passes to the dispatcher.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::alert::AlertDispatcher;
use super::constants::{Opcode, READY_MARKER};
use super::frame::{Command, Marker, checksum};
use crate::config::Timeouts;
use crate::error::{FramePhase, Result, SpdError};
use crate::events::{PacketDirection, SpdEvent, SpdObserver};
use crate::transport::{SerialTransport, TransportError};

/// Borrowed view over an exclusively held link for one or more exchanges.
pub struct ProtocolEngine<'a, T: SerialTransport + ?Sized, O: SpdObserver + ?Sized> {
    transport: &'a mut T,
    observer: &'a O,
    timeouts: &'a Timeouts,
}

impl<'a, T: SerialTransport + ?Sized, O: SpdObserver + ?Sized> ProtocolEngine<'a, T, O> {
    pub fn new(transport: &'a mut T, observer: &'a O, timeouts: &'a Timeouts) -> Self {
        Self {
            transport,
            observer,
            timeouts,
        }
    }

    /// Write the command in a single transport write.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let bytes = command.to_bytes();
        trace!(command = ?command, "Sending");
        self.transport.write(&bytes)?;
        self.observer.on_event(&SpdEvent::Packet {
            direction: PacketDirection::Tx,
            length: bytes.len(),
            data: Some(bytes),
        });
        Ok(())
    }

    /// Wait up to `timeout` for the reply to `opcode`.
    ///
    /// A READY frame yields `[READY_MARKER]`. Bytes that are not markers are
    /// dropped.
    pub fn receive(&mut self, opcode: Opcode, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SpdError::Timeout {
                    phase: FramePhase::Marker,
                    timeout_ms,
                });
            }

            let byte = match self.transport.read_byte(remaining) {
                Ok(b) => b,
                Err(TransportError::Timeout { .. }) => {
                    debug!(command = %opcode, timeout_ms, "No reply");
                    return Err(SpdError::Timeout {
                        phase: FramePhase::Marker,
                        timeout_ms,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            match Marker::from_byte(byte) {
                Some(Marker::Response) => {
                    let payload = self.read_response()?;
                    self.observer.on_event(&SpdEvent::Packet {
                        direction: PacketDirection::Rx,
                        length: payload.len(),
                        data: Some(payload.clone()),
                    });
                    return Ok(payload);
                }
                Some(Marker::Alert) => {
                    self.read_alert()?;
                }
                Some(Marker::Ready) => return Ok(vec![READY_MARKER]),
                Some(Marker::Unknown) => {
                    warn!(command = %opcode, "Firmware reports unsupported hardware");
                    return Err(SpdError::UnsupportedHardware { command: opcode });
                }
                None => trace!(byte = %format!("0x{:02X}", byte), "Discarding stray byte"),
            }
        }
    }

    /// Drop whatever is buffered, such as a reply that arrived after its
    /// request timed out.
    pub fn discard_input(&mut self) -> Result<()> {
        debug!("Discarding buffered input");
        self.transport.discard_buffers()?;
        Ok(())
    }

    /// Send and receive as one exchange.
    pub fn execute(&mut self, command: &Command, timeout: Duration) -> Result<Vec<u8>> {
        self.send(command)?;
        self.receive(command.opcode, timeout)
    }

    /// Listen for `window` with nothing outstanding, dispatching alerts.
    /// Returns the number of alerts seen.
    pub fn poll_alerts(&mut self, window: Duration) -> Result<usize> {
        let deadline = Instant::now() + window;
        let mut seen = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(seen);
            }
            let byte = match self.transport.read_byte(remaining) {
                Ok(b) => b,
                Err(TransportError::Timeout { .. }) => return Ok(seen),
                Err(e) => return Err(e.into()),
            };
            match Marker::from_byte(byte) {
                Some(Marker::Alert) => {
                    if self.read_alert()? {
                        seen += 1;
                    }
                }
                _ => trace!(byte = %format!("0x{:02X}", byte), "Ignoring idle byte"),
            }
        }
    }

    /// Length, payload, then checksum, each phase under its own budget.
    fn read_response(&mut self) -> Result<Vec<u8>> {
        let frame = self.timeouts.frame();

        let len = self.read_phase(FramePhase::Length, frame)? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + frame;
        let mut payload = Vec::with_capacity(len);
        while payload.len() < len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            payload.push(self.read_phase(FramePhase::Payload, remaining)?);
        }

        let actual = self.read_phase(FramePhase::Checksum, frame)?;
        let expected = checksum(&payload);
        if actual != expected {
            warn!(
                expected = %format!("0x{:02X}", expected),
                actual = %format!("0x{:02X}", actual),
                len,
                "Checksum mismatch"
            );
            return Err(SpdError::ChecksumMismatch { expected, actual });
        }

        Ok(payload)
    }

    /// Read the code after an alert marker and dispatch it. A missing code
    /// is not an error; the caller just keeps waiting.
    fn read_alert(&mut self) -> Result<bool> {
        match self.read_phase(FramePhase::AlertCode, self.timeouts.alert_code()) {
            Ok(code) => {
                AlertDispatcher::new(self.observer).dispatch(code);
                Ok(true)
            }
            Err(SpdError::Timeout { .. }) => {
                debug!("Alert marker without code");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn read_phase(&mut self, phase: FramePhase, timeout: Duration) -> Result<u8> {
        match self.transport.read_byte(timeout) {
            Ok(b) => Ok(b),
            Err(TransportError::Timeout { timeout_ms }) => {
                Err(SpdError::Timeout { phase, timeout_ms })
            }
            Err(e) => Err(e.into()),
        }
    }
}
