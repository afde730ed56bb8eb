//! serialport-based transport implementation.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, instrument, trace};

use super::traits::{SerialTransport, TransportError};

/// Pause between availability checks while waiting for a byte.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Serial port discovered on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// USB VID/PID when the port is a USB-serial bridge.
    pub usb_ids: Option<(u16, u16)>,
    pub product: Option<String>,
}

/// serialport-backed transport.
pub struct SerialPortTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    rx: VecDeque<u8>,
    write_timeout: Duration,
}

impl SerialPortTransport {
    /// Open `port` at `baud` (8N1, no flow control).
    ///
    /// The firmware reboots when the port is opened and ignores commands
    /// while booting, so this waits `boot_delay` and then discards whatever
    /// arrived in the meantime.
    #[instrument(level = "info", skip(boot_delay, write_timeout))]
    pub fn open(
        port: &str,
        baud: u32,
        boot_delay: Duration,
        write_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let handle = serialport::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(write_timeout)
            .open()
            .map_err(|e| TransportError::OpenFailed {
                port: port.to_string(),
                message: e.to_string(),
            })?;

        info!(port = %port, baud, "Serial port opened");

        let mut transport = Self {
            port: Some(handle),
            name: port.to_string(),
            rx: VecDeque::new(),
            write_timeout,
        };

        if !boot_delay.is_zero() {
            debug!(delay_ms = boot_delay.as_millis() as u64, "Waiting for firmware boot");
            thread::sleep(boot_delay);
        }
        transport.discard_buffers()?;

        Ok(transport)
    }

    /// List serial ports present on this host.
    pub fn available_ports() -> Result<Vec<PortInfo>, TransportError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    name: p.port_name,
                    usb_ids: Some((usb.vid, usb.pid)),
                    product: usb.product,
                },
                _ => PortInfo {
                    name: p.port_name,
                    usb_ids: None,
                    product: None,
                },
            })
            .collect())
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }

    /// Move whatever the driver has buffered into `rx`.
    fn fill(&mut self) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        let available = port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; available];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
        };
        trace!(bytes = n, "Buffered input");
        self.rx.extend(&buf[..n]);
        Ok(())
    }
}

impl SerialTransport for SerialPortTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let timeout_ms = self.write_timeout.as_millis() as u64;
        let port = self.port_mut()?;
        match port.write_all(data).and_then(|_| port.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                Err(TransportError::WriteTimeout { timeout_ms })
            }
            Err(e) => Err(TransportError::WriteFailed(e.to_string())),
        }
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(byte) = self.rx.pop_front() {
                return Ok(byte);
            }
            self.fill()?;
            if !self.rx.is_empty() {
                continue;
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        self.port_mut()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.name, "Serial port closed");
        }
        self.rx.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.close();
    }
}
