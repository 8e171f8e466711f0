//! Error types for input validation and scheduling passes.

use thiserror::Error;

/// Why an inbound position report was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("position report without aircraft id")]
    MissingId,
    #[error("non-finite {field} in report from {id}")]
    NonFinite { id: String, field: &'static str },
}

/// A scheduling pass that could not produce a consistent timeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("non-finite ETA for {0}")]
    InvalidEta(String),
    #[error("slot {0} ends before it starts")]
    InvertedSlot(String),
    #[error("slots {0} and {1} overlap")]
    Overlap(String, String),
    #[error("time of {0} out of range")]
    TimeOverflow(String),
}
