//! labelcheck-client library
//!
//! Client-side progress tracking for the label compliance analysis service:
//!
//! - [`tracker`]: single-item upload, then fixed-interval status polling
//! - [`batch`]: batch upload, live pushed progress, then one results fetch
//! - [`api`]: the remote service seam and its HTTP implementation

pub mod api;
pub mod batch;
pub mod error;
pub mod task;
pub mod tracker;

pub use crate::api::{AnalysisApi, BatchManifest, HttpAnalysisClient, LabelUpload};
pub use crate::batch::{BatchProgressSubscriber, BatchSession, SubscriberConfig};
pub use crate::error::{ApiError, TrackingError};
pub use crate::tracker::{SubmissionTracker, TrackerConfig};
