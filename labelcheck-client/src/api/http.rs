//! reqwest implementation of [`AnalysisApi`]

use super::{sse, AnalysisApi, BatchManifest, LabelUpload, ProgressStream};
use crate::error::ApiError;
use labelcheck_common::types::{
    AnalysisPage, AnalysisRecord, ApplicationDetails, BatchAccepted, BatchDetail, BatchHandle,
    HistoryQuery, SampleLabel, SampleLabelsResponse, SubmissionHandle, UploadAccepted,
};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("labelcheck/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the remote analysis service
#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    http_client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    /// `request_timeout` bounds every request/response exchange. The batch
    /// event stream is long-lived and only gets a connect timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let stream_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            stream_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ApiError::Status(status.as_u16(), error_text));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::send(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Reference labels the service publishes
    pub async fn list_samples(&self) -> Result<Vec<SampleLabel>, ApiError> {
        let response: SampleLabelsResponse =
            Self::send_json(self.http_client.get(self.url("/samples/"))).await?;
        Ok(response.samples)
    }

    /// Download one sample image, ready to submit
    pub async fn fetch_sample_image(&self, filename: &str) -> Result<LabelUpload, ApiError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ApiError::InvalidUpload(format!(
                "invalid sample filename '{}'",
                filename
            )));
        }

        let url = self.url(&format!("/samples/{}/image", filename));
        let response = Self::send(self.http_client.get(url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        debug!(sample = filename, bytes = bytes.len(), "Sample image downloaded");
        LabelUpload::from_bytes(filename, bytes.to_vec())
    }

    fn image_part(upload: &LabelUpload) -> Result<Part, ApiError> {
        Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| ApiError::InvalidUpload(e.to_string()))
    }
}

#[async_trait::async_trait]
impl AnalysisApi for HttpAnalysisClient {
    async fn upload_label(
        &self,
        upload: &LabelUpload,
        details: &ApplicationDetails,
    ) -> Result<UploadAccepted, ApiError> {
        let mut form = Form::new().part("file", Self::image_part(upload)?);
        for (name, value) in details.fields() {
            form = form.text(name, value.to_string());
        }

        debug!(file = %upload.file_name, bytes = upload.bytes.len(), "Uploading label");
        Self::send_json(self.http_client.post(self.url("/analysis/single")).multipart(form)).await
    }

    async fn fetch_analysis(&self, handle: &SubmissionHandle) -> Result<AnalysisRecord, ApiError> {
        let url = self.url(&format!("/analysis/{}", handle));
        Self::send_json(self.http_client.get(url)).await
    }

    async fn list_analyses(&self, query: &HistoryQuery) -> Result<AnalysisPage, ApiError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("page_size", query.page_size.to_string()),
        ];
        if let Some(verdict) = query.verdict {
            params.push(("verdict", verdict.as_str().to_string()));
        }

        Self::send_json(self.http_client.get(self.url("/analysis/")).query(&params)).await
    }

    async fn upload_batch(
        &self,
        labels: &[LabelUpload],
        manifest: Option<&BatchManifest>,
    ) -> Result<BatchAccepted, ApiError> {
        if labels.is_empty() {
            return Err(ApiError::InvalidUpload("batch has no images".to_string()));
        }

        let mut form = Form::new();
        for label in labels {
            form = form.part("files", Self::image_part(label)?);
        }

        let fallback = BatchManifest::empty();
        let manifest = manifest.unwrap_or(&fallback);
        let csv_part = Part::bytes(manifest.bytes.clone())
            .file_name(manifest.file_name.clone())
            .mime_str("text/csv")
            .map_err(|e| ApiError::InvalidUpload(e.to_string()))?;
        form = form.part("csv_file", csv_part);

        debug!(files = labels.len(), "Uploading batch");
        Self::send_json(self.http_client.post(self.url("/batch/upload")).multipart(form)).await
    }

    async fn open_batch_stream(&self, handle: &BatchHandle) -> Result<ProgressStream, ApiError> {
        let url = self.url(&format!("/batch/{}/stream", handle));
        let request = self
            .stream_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream");

        let response = Self::send(request).await?;
        debug!(batch_id = %handle, "Batch progress stream opened");
        Ok(sse::progress_stream(response.bytes_stream()))
    }

    async fn fetch_batch(&self, handle: &BatchHandle) -> Result<BatchDetail, ApiError> {
        let url = self.url(&format!("/batch/{}", handle));
        Self::send_json(self.http_client.get(url)).await
    }
}
