//! Output formatters for decoded meter readings.
//!
//! The run loop is generic over [`OutputFormatter`] so the record layout is
//! an output-layer decision, not something the decoder knows about.

pub mod json;

use crate::reading::Reading;

/// Formats a decoded reading into one output line.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading (including its timestamp) as a single line,
    /// without a trailing newline.
    fn format(&self, reading: &Reading) -> String;
}
