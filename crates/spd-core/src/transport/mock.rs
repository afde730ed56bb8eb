//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{SerialTransport, TransportError};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

struct MockState {
    /// Bytes waiting to be read.
    rx: VecDeque<u8>,
    /// Scripted replies, one popped per write.
    replies: VecDeque<Vec<u8>>,
    /// Fallback when no scripted reply is queued.
    responder: Option<Responder>,
    /// Captured writes.
    write_log: Vec<Vec<u8>>,
    open: bool,
    discards: usize,
}

/// Mock transport for unit testing protocol and paging logic.
///
/// Clones share state, so a test can keep one handle for inspection after
/// handing another to the programmer.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    name: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                rx: VecDeque::new(),
                replies: VecDeque::new(),
                responder: None,
                write_log: Vec::new(),
                open: true,
                discards: 0,
            })),
            name: "mock".to_string(),
        }
    }

    /// Mock whose replies are computed from each written command.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        mock.set_responder(responder);
        mock
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    /// Queue raw bytes to be delivered after the next write.
    /// An empty reply simulates a device that never answers.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.state.lock().unwrap().replies.push_back(bytes.to_vec());
    }

    /// Make bytes readable immediately, independent of any write.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.extend(bytes);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().write_log.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.state.lock().unwrap().write_log.clear();
    }

    /// Number of times the buffers were discarded.
    pub fn discard_count(&self) -> usize {
        self.state.lock().unwrap().discards
    }

    pub fn pending_rx(&self) -> usize {
        self.state.lock().unwrap().rx.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.write_log.push(data.to_vec());
        let scripted = state.replies.pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => match state.responder.as_mut() {
                Some(responder) => responder(data),
                None => Vec::new(),
            },
        };
        state.rx.extend(reply);
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.rx.pop_front().ok_or(TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.rx.clear();
        state.discards += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
