//! Programmer connection - owns the serial link and serializes exchanges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::ProgrammerConfig;
use crate::error::{Result, SpdError};
use crate::events::{LogLevel, SpdEvent, SpdObserver, TracingObserver};
use crate::protocol::{Command, ProtocolEngine};
use crate::transport::{SerialPortTransport, SerialTransport};

/// Shared flag checked between chunks of whole-image operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Connection to an SPD programmer.
///
/// `None` in `link` is the closed state. Every exchange holds the lock for
/// its whole send+receive, so replies can never be crossed between callers.
/// `transfer` is held for a whole-image operation and by single commands
/// whose meaning depends on the selected DDR5 page.
pub struct Programmer<T: SerialTransport, O: SpdObserver = TracingObserver> {
    link: Mutex<Option<T>>,
    transfer: Mutex<()>,
    /// Set when an exchange timed out and its reply may still arrive.
    stale_input: AtomicBool,
    observer: Arc<O>,
    config: ProgrammerConfig,
    cancel: CancelToken,
}

impl Programmer<SerialPortTransport, TracingObserver> {
    /// Open a serial port and handshake with the default tracing observer.
    pub fn open(port: &str, config: ProgrammerConfig) -> Result<Self> {
        Self::open_with_observer(port, config, Arc::new(TracingObserver))
    }
}

impl<O: SpdObserver> Programmer<SerialPortTransport, O> {
    #[instrument(skip(config, observer))]
    pub fn open_with_observer(
        port: &str,
        config: ProgrammerConfig,
        observer: Arc<O>,
    ) -> Result<Self> {
        let transport = SerialPortTransport::open(
            port,
            config.baud_rate,
            config.boot_delay(),
            config.timeouts.write(),
        )?;
        Self::connect(transport, config, observer)
    }
}

impl<T: SerialTransport, O: SpdObserver> Programmer<T, O> {
    /// Take over an open transport and ping the device.
    ///
    /// On a failed ping the transport is closed and the error returned.
    pub fn connect(transport: T, config: ProgrammerConfig, observer: Arc<O>) -> Result<Self> {
        let port = transport.port_name().to_string();
        let programmer = Self {
            link: Mutex::new(Some(transport)),
            transfer: Mutex::new(()),
            stale_input: AtomicBool::new(false),
            observer,
            config,
            cancel: CancelToken::new(),
        };

        match programmer.ping() {
            Ok(true) => {
                info!(port = %port, "Programmer responded to ping");
                programmer.emit(SpdEvent::Connected { port });
                Ok(programmer)
            }
            Ok(false) => {
                warn!(port = %port, "Unexpected ping reply");
                programmer.disconnect();
                Err(SpdError::failure(
                    crate::protocol::Opcode::Ping,
                    "device did not answer ready",
                ))
            }
            Err(e) => {
                warn!(port = %port, error = %e, "Ping failed");
                programmer.disconnect();
                Err(e)
            }
        }
    }

    /// Close the link. Safe to call repeatedly.
    pub fn disconnect(&self) {
        if let Some(mut transport) = self.lock().take() {
            transport.close();
            self.emit(SpdEvent::Disconnected);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().as_ref().is_some_and(|t| t.is_open())
    }

    pub fn port_name(&self) -> Option<String> {
        self.lock().as_ref().map(|t| t.port_name().to_string())
    }

    pub fn config(&self) -> &ProgrammerConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<O> {
        &self.observer
    }

    /// Handle for aborting a running whole-image operation from another
    /// thread.
    ///
    /// The token is re-armed when a whole-image operation returns, so a
    /// cancel issued before the call still stops it at the first chunk.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Listen for alerts with no command in flight.
    pub fn poll_alerts(&self, window: Duration) -> Result<usize> {
        self.with_engine(|engine| engine.poll_alerts(window))
    }

    /// One command, one reply.
    ///
    /// After a timed-out exchange the input is flushed before the next
    /// command goes out, so a late reply cannot answer it.
    pub(crate) fn exchange(&self, command: Command) -> Result<Vec<u8>> {
        let timeout = if command.opcode.is_slow() {
            self.config.timeouts.slow_response()
        } else {
            self.config.timeouts.response()
        };
        self.with_engine(|engine| {
            if self.stale_input.swap(false, Ordering::SeqCst) {
                engine.discard_input()?;
            }
            let result = engine.execute(&command, timeout);
            if matches!(result, Err(SpdError::Timeout { .. })) {
                self.stale_input.store(true, Ordering::SeqCst);
            }
            result
        })
    }

    /// Exclusive use of the page register across several exchanges.
    pub(crate) fn transfer_lock(&self) -> MutexGuard<'_, ()> {
        self.transfer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop stale input before retrying after a failed exchange.
    pub(crate) fn discard_input(&self) -> Result<()> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or(SpdError::NotConnected)?;
        transport.discard_buffers()?;
        self.stale_input.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn emit(&self, event: SpdEvent) {
        self.observer.on_event(&event);
    }

    /// Message meant for the user rather than the developer log.
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(SpdEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn with_engine<R>(
        &self,
        f: impl FnOnce(&mut ProtocolEngine<'_, T, O>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or(SpdError::NotConnected)?;
        if !transport.is_open() {
            return Err(SpdError::NotConnected);
        }
        let mut engine =
            ProtocolEngine::new(transport, self.observer.as_ref(), &self.config.timeouts);
        f(&mut engine)
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
