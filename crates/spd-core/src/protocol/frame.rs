//! Command encoding and device frame layout.
//!
//! Request: `[opcode][params...]`, always written in one piece.
//!
//! Device frames:
//! - Response: `0x26 [len] [payload; len] [checksum]`
//! - Alert:    `0x40 [code]`
//! - Ready:    `0x21`
//! - Unknown:  `0x3F`

use std::fmt;

use super::constants::*;

/// Additive checksum: sum of payload bytes mod 256.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Marker byte that starts each device frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Response,
    Alert,
    Ready,
    Unknown,
}

impl Marker {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            RESPONSE_MARKER => Some(Marker::Response),
            ALERT_MARKER => Some(Marker::Alert),
            READY_MARKER => Some(Marker::Ready),
            UNKNOWN_MARKER => Some(Marker::Unknown),
            _ => None,
        }
    }
}

/// One command: opcode plus parameter bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub params: Vec<u8>,
}

impl Command {
    pub fn new(opcode: Opcode, params: &[u8]) -> Self {
        Self {
            opcode,
            params: params.to_vec(),
        }
    }

    pub fn bare(opcode: Opcode) -> Self {
        Self::new(opcode, &[])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.params.len());
        buf.push(self.opcode.as_byte());
        buf.extend_from_slice(&self.params);
        buf
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({} {:02X?})", self.opcode, self.params)
    }
}

/// Build a response frame. Payloads longer than 255 bytes cannot be
/// expressed and are truncated.
pub fn encode_response(payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(u8::MAX as usize)];
    let mut buf = Vec::with_capacity(payload.len() + 3);
    buf.push(RESPONSE_MARKER);
    buf.push(payload.len() as u8);
    if payload.is_empty() {
        return buf;
    }
    buf.extend_from_slice(payload);
    buf.push(checksum(payload));
    buf
}

pub fn encode_alert(code: u8) -> Vec<u8> {
    vec![ALERT_MARKER, code]
}
