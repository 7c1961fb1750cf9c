//! Remote analysis service seam
//!
//! [`AnalysisApi`] is the only way the tracking cores reach the network.
//! [`HttpAnalysisClient`] is the production implementation; tests supply
//! scripted in-memory implementations.

mod http;
pub mod sse;

pub use http::HttpAnalysisClient;

use crate::error::ApiError;
use futures::stream::BoxStream;
use labelcheck_common::types::{
    AnalysisPage, AnalysisRecord, ApplicationDetails, BatchAccepted, BatchDetail, BatchHandle,
    BatchProgressSnapshot, HistoryQuery, SubmissionHandle, UploadAccepted,
};
use std::path::Path;

/// Pushed batch progress; ends when the server closes the stream
pub type ProgressStream = BoxStream<'static, Result<BatchProgressSnapshot, ApiError>>;

/// Image content types the remote accepts
pub const ALLOWED_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/tiff"];

/// Remote analysis service operations
#[async_trait::async_trait]
pub trait AnalysisApi: Send + Sync + 'static {
    /// Submit one label image with optional application details
    async fn upload_label(
        &self,
        upload: &LabelUpload,
        details: &ApplicationDetails,
    ) -> Result<UploadAccepted, ApiError>;

    /// Full re-fetch of one analysis record
    async fn fetch_analysis(&self, handle: &SubmissionHandle) -> Result<AnalysisRecord, ApiError>;

    /// Page through past analyses
    async fn list_analyses(&self, query: &HistoryQuery) -> Result<AnalysisPage, ApiError>;

    /// Submit a set of label images as one batch
    async fn upload_batch(
        &self,
        labels: &[LabelUpload],
        manifest: Option<&BatchManifest>,
    ) -> Result<BatchAccepted, ApiError>;

    /// Open the server-push progress stream for a batch
    ///
    /// Dropping the returned stream closes the connection.
    async fn open_batch_stream(&self, handle: &BatchHandle) -> Result<ProgressStream, ApiError>;

    /// Batch record plus every per-item analysis
    async fn fetch_batch(&self, handle: &BatchHandle) -> Result<BatchDetail, ApiError>;
}

/// One label image ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl LabelUpload {
    /// Build from in-memory bytes, sniffing the content type
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ApiError> {
        let file_name = file_name.into();
        let content_type = detect_content_type(&file_name, &bytes).ok_or_else(|| {
            ApiError::InvalidUpload(format!(
                "{}: unsupported image type (allowed: {})",
                file_name,
                ALLOWED_CONTENT_TYPES.join(", ")
            ))
        })?;

        Ok(Self {
            file_name,
            content_type: content_type.to_string(),
            bytes,
        })
    }

    /// Read an image from disk
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::InvalidUpload(format!("{}: {}", path.display(), e)))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "label".to_string());

        Self::from_bytes(file_name, bytes)
    }
}

/// Magic bytes first, extension as fallback; `None` if not an allowed image
fn detect_content_type(file_name: &str, bytes: &[u8]) -> Option<&'static str> {
    if let Some(kind) = infer::get(bytes) {
        let mime = kind.mime_type();
        return ALLOWED_CONTENT_TYPES.iter().copied().find(|allowed| *allowed == mime);
    }

    let extension = Path::new(file_name)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// CSV carrying per-file application details for a batch
///
/// Columns: `filename` plus any of the [`ApplicationDetails`] field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchManifest {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl BatchManifest {
    /// Header-only manifest sent when the caller has none
    pub fn empty() -> Self {
        Self {
            file_name: "manifest.csv".to_string(),
            bytes: b"filename\n".to_vec(),
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::InvalidUpload(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "manifest.csv".to_string()),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn test_content_type_from_magic_bytes() {
        // Extension lies, bytes win
        let upload = LabelUpload::from_bytes("label.jpg", PNG_HEADER.to_vec()).unwrap();
        assert_eq!(upload.content_type, "image/png");
    }

    #[test]
    fn test_content_type_from_extension() {
        let upload = LabelUpload::from_bytes("label.JPEG", vec![1, 2, 3]).unwrap();
        assert_eq!(upload.content_type, "image/jpeg");
    }

    #[test]
    fn test_rejects_non_images() {
        assert!(LabelUpload::from_bytes("notes.txt", b"hello".to_vec()).is_err());
        // PDF magic bytes are recognised but not allowed
        assert!(LabelUpload::from_bytes("label.png", b"%PDF-1.7\n".to_vec()).is_err());
    }

    #[test]
    fn test_empty_manifest_has_header() {
        let manifest = BatchManifest::empty();
        assert_eq!(manifest.bytes, b"filename\n");
    }
}
