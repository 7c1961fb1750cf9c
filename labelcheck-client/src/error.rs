//! Error types for labelcheck-client
//!
//! Two layers:
//! - [`ApiError`]: what went wrong talking to the remote service. Logged,
//!   never shown to the user as-is.
//! - [`TrackingError`]: the single human-readable condition each tracking
//!   component exposes. Every variant is terminal for its component; recovery
//!   is always an explicit reset.

use thiserror::Error;

/// Transport-level failure at the remote API seam
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, reset, timed out, or body read failed
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("API error {0}: {1}")]
    Status(u16, String),

    /// Body (or pushed message) did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Upload could not be built from local input
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

/// User-visible terminal condition of a tracking component
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// Single-item upload rejected or unreachable
    #[error("Failed to upload file")]
    UploadFailed,

    /// A status poll failed; the tracker does not retry
    #[error("Failed to fetch analysis status")]
    PollFetchFailed,

    /// Polling budget exhausted before a terminal status
    #[error("Analysis timed out")]
    PollTimedOut,

    /// Polling budget too large to schedule a deadline for
    #[error("Polling budget out of range")]
    PollBudgetOutOfRange,

    /// Remote reported the item as failed
    #[error("{0}")]
    ItemFailed(String),

    /// Batch progress stream dropped or could not connect
    #[error("Connection lost")]
    StreamConnectionLost,

    /// Full batch results could not be fetched after completion
    #[error("Failed to fetch batch results")]
    BatchResultFetchFailed,

    /// Batch upload rejected or unreachable
    #[error("Failed to upload batch")]
    BatchUploadFailed,
}

impl TrackingError {
    pub const ITEM_FAILED_FALLBACK: &'static str = "Analysis failed";

    /// Item failure carrying the remote message, or the generic fallback
    pub fn item_failed(message: Option<&str>) -> Self {
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(Self::ITEM_FAILED_FALLBACK);
        TrackingError::ItemFailed(message.to_string())
    }
}
