//! Whole-image read and write.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::plan::{PagingStrategy, Segment};
use crate::error::{Result, SpdError};
use crate::events::{LogLevel, SpdEvent, SpdObserver};
use crate::module::ModuleInfo;
use crate::programmer::Programmer;
use crate::protocol::constants::*;
use crate::transport::SerialTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Read,
    Write,
}

impl Transfer {
    fn as_str(self) -> &'static str {
        match self {
            Transfer::Read => "read",
            Transfer::Write => "write",
        }
    }
}

impl<T: SerialTransport, O: SpdObserver> Programmer<T, O> {
    /// Read the full SPD image of a detected module.
    ///
    /// The first chunk that still fails after its retries aborts the read.
    /// The cancel token is checked between chunks and re-armed on return.
    #[instrument(skip(self, info), fields(module = %info))]
    pub fn read_entire_spd(&self, info: &ModuleInfo) -> Result<Vec<u8>> {
        let strategy = PagingStrategy::for_module(info)?;
        let _transfer = self.transfer_lock();

        let (chunk, attempts) = match strategy {
            PagingStrategy::Ddr5 { .. } => (
                self.config().paging.ddr5_read_chunk,
                self.config().paging.ddr5_retries,
            ),
            _ => (self.config().paging.read_chunk, self.config().paging.retries),
        };
        let chunk = chunk.clamp(1, MAX_READ_LENGTH);

        let mut image = Vec::with_capacity(strategy.size());
        let result = self.run_segments(info.address, strategy, chunk, Transfer::Read, |segment| {
            let data = self.with_retries(segment.offset, attempts, || {
                self.read_chunk(info.address, segment.wire_offset, segment.len)
            })?;
            image.extend_from_slice(&data);
            Ok(())
        });
        let result = self.finish(info.address, strategy, result);
        self.cancel().reset();
        result?;

        info!(bytes = image.len(), "SPD read complete");
        Ok(image)
    }

    /// Write a full SPD image to a detected module.
    ///
    /// Reversible protection is cleared first on DDR4 and DDR5. A chunk whose
    /// page write keeps failing is rewritten byte by byte; once more than
    /// `max_write_errors` chunks needed that, the write aborts.
    #[instrument(skip(self, info, image), fields(module = %info, bytes = image.len()))]
    pub fn write_entire_spd(&self, info: &ModuleInfo, image: &[u8]) -> Result<()> {
        let strategy = PagingStrategy::for_module(info)?;
        if image.len() != strategy.size() {
            return Err(SpdError::invalid(format!(
                "image is {} bytes, module holds {}",
                image.len(),
                strategy.size()
            )));
        }
        let _transfer = self.transfer_lock();

        let paging = &self.config().paging;
        let chunk = paging.write_chunk.clamp(1, MAX_WRITE_LENGTH);
        let attempts = match strategy {
            PagingStrategy::Ddr5 { .. } => paging.ddr5_retries,
            _ => paging.retries,
        };
        let mut errors = 0u32;

        let result = self.clear_protection(strategy).and_then(|()| {
            self.run_segments(info.address, strategy, chunk, Transfer::Write, |segment| {
                let data = &image[segment.range()];
                let page_write = self.with_retries(segment.offset, attempts, || {
                    expect_written(
                        self.write_page_raw(info.address, segment.wire_offset, data),
                        Opcode::SpdWritePage,
                        segment.offset,
                    )
                });

                match page_write {
                    Ok(()) => Ok(()),
                    Err(e @ SpdError::ExhaustedRetries { .. }) => {
                        errors += 1;
                        if errors > paging.max_write_errors {
                            warn!(errors, error = %e, "Too many failed chunks");
                            return Err(SpdError::TooManyErrors {
                                offset: segment.offset,
                                errors,
                            });
                        }
                        warn!(
                            offset = %format!("0x{:04X}", segment.offset),
                            error = %e,
                            "Page write failed, falling back to byte writes"
                        );
                        self.emit(SpdEvent::ByteFallback {
                            offset: segment.offset,
                            len: segment.len,
                        });
                        self.write_bytes(info.address, segment, data, attempts)
                    }
                    Err(e) => Err(e),
                }
            })
        });
        let result = self.finish(info.address, strategy, result);
        self.cancel().reset();
        result?;

        info!(fallbacks = errors, "SPD write complete");
        Ok(())
    }

    /// Walk the plan, selecting pages and pacing page boundaries.
    fn run_segments(
        &self,
        address: u8,
        strategy: PagingStrategy,
        chunk: usize,
        transfer: Transfer,
        mut each: impl FnMut(&Segment) -> Result<()>,
    ) -> Result<()> {
        let total = strategy.size();
        let attempts = self.config().paging.ddr5_retries;

        for segment in strategy.segments(chunk) {
            if self.cancel().is_cancelled() {
                info!(offset = segment.offset, "Cancelled");
                return Err(SpdError::Cancelled {
                    offset: segment.offset,
                });
            }

            if segment.page_start {
                match strategy {
                    PagingStrategy::Ddr5 { .. } => {
                        self.with_retries(segment.offset, attempts, || {
                            self.select_page(address, segment.page)
                        })?;
                    }
                    PagingStrategy::Ddr4 { .. } if segment.page > 0 && transfer == Transfer::Write => {
                        let delay = self.config().paging.ddr4_boundary_delay();
                        debug!(offset = segment.offset, ?delay, "Crossing DDR4 page boundary");
                        self.emit(SpdEvent::BoundaryDelay {
                            offset: segment.offset,
                            delay_ms: delay.as_millis() as u64,
                        });
                        self.settle(delay);
                    }
                    _ => {}
                }
            }

            each(&segment)?;

            self.emit(SpdEvent::Progress {
                operation: transfer.as_str().to_string(),
                current: segment.end(),
                total,
            });
        }
        Ok(())
    }

    /// Point MR11 at `page` and let the hub settle.
    fn select_page(&self, address: u8, page: u8) -> Result<()> {
        if !self.write_hub_raw(address, MR11_PAGE_SELECT, page)? {
            return Err(SpdError::failure(
                Opcode::Spd5HubReg,
                format!("select page {} on 0x{:02X}", page, address),
            ));
        }
        self.emit(SpdEvent::PageSelected { address, page });
        self.settle(self.config().paging.page_settle());
        Ok(())
    }

    fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Return a DDR5 hub to page 0 after a transfer. A failure here only
    /// replaces a successful result.
    fn finish(&self, address: u8, strategy: PagingStrategy, result: Result<()>) -> Result<()> {
        if !matches!(strategy, PagingStrategy::Ddr5 { .. }) {
            return result;
        }
        if matches!(result, Err(SpdError::NotConnected | SpdError::Transport(_))) {
            return result;
        }
        match (self.select_page(address, 0), result) {
            (Ok(()), result) => result,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(original)) => {
                self.log(LogLevel::Warn, format!("Could not restore page 0: {}", e));
                Err(original)
            }
        }
    }

    fn clear_protection(&self, strategy: PagingStrategy) -> Result<()> {
        match strategy {
            PagingStrategy::Ddr3Like { .. } => Ok(()),
            PagingStrategy::Ddr4 { .. } => match self.clear_rswp() {
                Ok(true) => Ok(()),
                Ok(false) => {
                    self.log(LogLevel::Warn, "DDR4 module did not clear write protection, continuing");
                    Ok(())
                }
                Err(e @ (SpdError::NotConnected | SpdError::Transport(_))) => Err(e),
                Err(e) => {
                    self.log(
                        LogLevel::Warn,
                        format!("Could not clear DDR4 write protection ({}), continuing", e),
                    );
                    Ok(())
                }
            },
            PagingStrategy::Ddr5 { .. } => {
                if self.clear_rswp()? {
                    Ok(())
                } else {
                    Err(SpdError::failure(
                        Opcode::Rswp,
                        "could not clear DDR5 write protection",
                    ))
                }
            }
        }
    }

    fn write_bytes(&self, address: u8, segment: &Segment, data: &[u8], attempts: u32) -> Result<()> {
        for (i, &value) in data.iter().enumerate() {
            let offset = segment.offset + i;
            let wire_offset = segment.wire_offset + i as u16;
            self.with_retries(offset, attempts, || {
                expect_written(
                    self.write_byte_raw(address, wire_offset, value),
                    Opcode::SpdWriteByte,
                    offset,
                )
            })?;
        }
        Ok(())
    }
}

/// A `false` write acknowledgement becomes a retryable failure.
fn expect_written(ack: Result<bool>, command: Opcode, offset: usize) -> Result<()> {
    if ack? {
        Ok(())
    } else {
        Err(SpdError::failure(
            command,
            format!("write rejected at 0x{:04X}", offset),
        ))
    }
}
