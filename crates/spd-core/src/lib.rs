//! SPD-Core: host-side driver for serial SPD/PMIC programmers.
//!
//! This crate talks to an I2C programmer over a serial port to read and
//! write the SPD EEPROM of DDR3, DDR4 and DDR5 memory modules, manage their
//! write protection and access DDR5 PMIC and hub registers.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: Serial port abstraction (serialport, mock)
//! - **Protocol**: Opcodes, frame markers, checksums and the exchange engine
//! - **Commands**: Typed, validated wrappers for every programmer command
//! - **Paging**: Whole-image read/write per module generation
//! - **Events**: Observer pattern for UI decoupling and alert delivery
//!
//! # Example
//!
//! ```no_run
//! use spd_core::{Programmer, ProgrammerConfig};
//!
//! let programmer = Programmer::open("/dev/ttyUSB0", ProgrammerConfig::default())
//!     .expect("open failed");
//! let module = programmer.detect_module(0x50).expect("detect failed");
//! let image = programmer.read_entire_spd(&module).expect("read failed");
//! println!("{}: {} bytes", module, image.len());
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod module;
pub mod paging;
pub mod programmer;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use config::{PagingConfig, ProgrammerConfig, Timeouts};
pub use error::{FramePhase, Result, SpdError};
pub use events::{
    AlertChannel, ChannelObserver, LogLevel, NullObserver, RecordingObserver, SpdEvent,
    SpdObserver, TracingObserver,
};
pub use module::{ClockMode, ModuleInfo, ModuleType, Pin, RswpSupport};
pub use paging::PagingStrategy;
pub use programmer::{CancelToken, Programmer};
pub use protocol::{Alert, Opcode};
pub use transport::{MockTransport, PortInfo, SerialPortTransport, SerialTransport, TransportError};
