//! Whole-image transfers.
//!
//! Provides the per-generation segment plan, chunk retries and the read and
//! write orchestration built on top of them.

pub mod orchestrator;
pub mod plan;
pub mod retry;

pub use plan::{PagingStrategy, Segment, Segments};
