//! Segment planning for whole-image transfers.
//!
//! A transfer is split into pages and each page into chunks no larger than
//! the requested chunk size. Chunks never straddle a page, so the caller
//! only has to act on the first segment of each page.

use crate::error::{Result, SpdError};
use crate::module::{ModuleInfo, ModuleType};
use crate::protocol::constants::*;

/// How an image is laid out on the wire, chosen once per transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStrategy {
    /// Single page, absolute offsets.
    Ddr3Like { size: usize },
    /// Two 256-byte pages selected by the offset's high bit.
    Ddr4 { size: usize },
    /// 128-byte pages selected through MR11.
    Ddr5 { size: usize, page_count: u8 },
}

impl PagingStrategy {
    pub fn for_module(info: &ModuleInfo) -> Result<Self> {
        if info.size == 0 || info.size > MAX_SPD_SIZE {
            return Err(SpdError::invalid(format!(
                "cannot transfer {} byte image for {}",
                info.size, info
            )));
        }
        match info.kind {
            ModuleType::NotDetected => Err(SpdError::invalid(format!(
                "no module at 0x{:02X}",
                info.address
            ))),
            ModuleType::Ddr3OrOther => Ok(Self::Ddr3Like { size: info.size }),
            ModuleType::Ddr4 => Ok(Self::Ddr4 { size: info.size }),
            ModuleType::Ddr5 => Ok(Self::Ddr5 {
                size: info.size,
                page_count: info.size.div_ceil(DDR5_PAGE_SIZE) as u8,
            }),
        }
    }

    pub fn size(&self) -> usize {
        match *self {
            Self::Ddr3Like { size } | Self::Ddr4 { size } | Self::Ddr5 { size, .. } => size,
        }
    }

    fn page_size(&self) -> usize {
        match *self {
            Self::Ddr3Like { size } => size,
            Self::Ddr4 { .. } => DDR4_PAGE_SIZE,
            Self::Ddr5 { .. } => DDR5_PAGE_SIZE,
        }
    }

    /// Offset as sent to SPD_READ_PAGE / SPD_WRITE_*.
    fn wire_offset(&self, offset: usize) -> u16 {
        match self {
            Self::Ddr5 { .. } => (SPD5_NVM_SELECT as usize | (offset % DDR5_PAGE_SIZE)) as u16,
            _ => offset as u16,
        }
    }

    pub fn segments(&self, chunk_size: usize) -> Segments {
        Segments::new(*self, chunk_size)
    }
}

/// One chunk of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset into the image.
    pub offset: usize,
    pub wire_offset: u16,
    pub len: usize,
    pub page: u8,
    /// First chunk of its page.
    pub page_start: bool,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.end()
    }
}

/// Iterator over the segments of one transfer.
#[derive(Debug, Clone)]
pub struct Segments {
    strategy: PagingStrategy,
    chunk_size: usize,
    offset: usize,
}

impl Segments {
    fn new(strategy: PagingStrategy, chunk_size: usize) -> Self {
        Self {
            strategy,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let size = self.strategy.size();
        if self.offset >= size {
            return None;
        }

        let page_size = self.strategy.page_size();
        let page = self.offset / page_size;
        let page_end = ((page + 1) * page_size).min(size);
        let len = (page_end - self.offset).min(self.chunk_size);

        let segment = Segment {
            offset: self.offset,
            wire_offset: self.strategy.wire_offset(self.offset),
            len,
            page: page as u8,
            page_start: self.offset % page_size == 0,
        };
        self.offset += len;
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(kind: ModuleType, size: usize) -> PagingStrategy {
        PagingStrategy::for_module(&ModuleInfo::new(0x50, kind, size)).unwrap()
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            strategy(ModuleType::Ddr5, 1024),
            PagingStrategy::Ddr5 {
                size: 1024,
                page_count: 8
            }
        );
        assert_eq!(strategy(ModuleType::Ddr4, 512), PagingStrategy::Ddr4 { size: 512 });
        assert!(PagingStrategy::for_module(&ModuleInfo::not_detected(0x50)).is_err());
        assert!(
            PagingStrategy::for_module(&ModuleInfo::new(0x50, ModuleType::Ddr3OrOther, 0))
                .is_err()
        );
    }

    #[test]
    fn test_ddr3_single_page() {
        let segments: Vec<_> = strategy(ModuleType::Ddr3OrOther, 256).segments(64).collect();
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.page == 0 && s.len == 64));
        assert_eq!(segments[3].wire_offset, 192);
        assert_eq!(segments.iter().filter(|s| s.page_start).count(), 1);
    }

    #[test]
    fn test_ddr4_pages_split_at_256() {
        let segments: Vec<_> = strategy(ModuleType::Ddr4, 512).segments(16).collect();
        assert_eq!(segments.len(), 32);
        assert!(segments.iter().all(|s| s.len <= 16));
        let second = segments.iter().find(|s| s.page == 1).unwrap();
        assert_eq!(second.offset, 256);
        assert_eq!(second.wire_offset, 256);
        assert!(second.page_start);

        // chunk size that does not divide the page
        let segments: Vec<_> = strategy(ModuleType::Ddr4, 512).segments(60).collect();
        assert!(segments.iter().all(|s| s.offset >= 256 || s.end() <= 256));
        assert_eq!(segments.iter().map(|s| s.len).sum::<usize>(), 512);
    }

    #[test]
    fn test_ddr5_visits_every_page() {
        let segments: Vec<_> = strategy(ModuleType::Ddr5, 1024).segments(32).collect();
        let pages: Vec<u8> = segments
            .iter()
            .filter(|s| s.page_start)
            .map(|s| s.page)
            .collect();
        assert_eq!(pages, (0..8).collect::<Vec<u8>>());
        assert_eq!(segments.len(), 32);
        assert_eq!(segments.last().unwrap().end(), 1024);
        assert_eq!(segments[0].wire_offset, 0x80);
        assert_eq!(segments[5].wire_offset, 0x80 | 32);
    }

    #[test]
    fn test_ddr5_truncates_last_page() {
        let plan = strategy(ModuleType::Ddr5, 1000);
        assert_eq!(
            plan,
            PagingStrategy::Ddr5 {
                size: 1000,
                page_count: 8
            }
        );
        let segments: Vec<_> = plan.segments(32).collect();
        let last_page: Vec<_> = segments.iter().filter(|s| s.page == 7).collect();
        assert_eq!(
            last_page.iter().map(|s| s.len).collect::<Vec<_>>(),
            vec![32, 32, 32, 8]
        );
        assert_eq!(segments.iter().map(|s| s.len).sum::<usize>(), 1000);
    }
}
