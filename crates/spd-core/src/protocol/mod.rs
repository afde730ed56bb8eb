//! Protocol module - wire format, alerts and the request/response engine.

pub mod alert;
pub mod constants;
pub mod engine;
pub mod frame;

pub use alert::{Alert, AlertDispatcher};
pub use constants::*;
pub use engine::ProtocolEngine;
pub use frame::{Command, Marker, checksum, encode_alert, encode_response};
