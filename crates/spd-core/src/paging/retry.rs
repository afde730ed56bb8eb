//! Chunk-level retry with linear backoff.

use std::thread;

use tracing::warn;

use crate::error::{Result, SpdError};
use crate::events::{SpdEvent, SpdObserver};
use crate::programmer::Programmer;
use crate::transport::SerialTransport;

impl<T: SerialTransport, O: SpdObserver> Programmer<T, O> {
    /// Run `op` up to `attempts` times.
    ///
    /// Only retryable errors are retried. Input is discarded after the
    /// backoff, right before the next attempt, so a reply that arrived late
    /// cannot answer the resent command. When the
    /// last attempt fails the error is wrapped in `ExhaustedRetries` at
    /// `offset`.
    pub(crate) fn with_retries<R>(
        &self,
        offset: usize,
        attempts: u32,
        mut op: impl FnMut() -> Result<R>,
    ) -> Result<R> {
        let attempts = attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= attempts {
                return Err(SpdError::ExhaustedRetries {
                    offset,
                    attempts,
                    source: Box::new(error),
                });
            }

            warn!(
                offset = %format!("0x{:04X}", offset),
                attempt,
                attempts,
                error = %error,
                "Chunk failed, retrying"
            );
            self.emit(SpdEvent::Retry {
                offset,
                attempt,
                error: error.to_string(),
            });

            thread::sleep(self.config().paging.backoff(attempt));
            self.discard_input()?;
            attempt += 1;
        }
    }
}
