//! Shared test utilities: a scripted in-memory [`AnalysisApi`]

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use labelcheck_client::api::{AnalysisApi, BatchManifest, LabelUpload, ProgressStream};
use labelcheck_client::ApiError;
use labelcheck_common::types::{
    AnalysisPage, AnalysisRecord, AnalysisStatus, ApplicationDetails, BatchAccepted, BatchDetail,
    BatchHandle, BatchProgressSnapshot, BatchRecord, BatchStatus, HistoryQuery, SubmissionHandle,
    UploadAccepted,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Sender side of a scripted batch progress stream
pub type StreamFeed = mpsc::UnboundedSender<Result<BatchProgressSnapshot, ApiError>>;

/// One scripted response
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    /// Resolve with a network error
    Err,
    /// Resolve with `T` after the delay
    Delayed(Duration, T),
    /// Never resolve
    Hang,
}

/// Script that repeats its last entry once exhausted
#[derive(Debug)]
struct Script<T>(VecDeque<Reply<T>>);

impl<T: Clone> Script<T> {
    fn new(replies: Vec<Reply<T>>) -> Self {
        Self(replies.into())
    }

    fn next(&mut self) -> Reply<T> {
        if self.0.len() > 1 {
            self.0.pop_front().unwrap_or(Reply::Hang)
        } else {
            self.0.front().cloned().unwrap_or(Reply::Hang)
        }
    }
}

async fn resolve<T>(reply: Reply<T>) -> Result<T, ApiError> {
    match reply {
        Reply::Ok(value) => Ok(value),
        Reply::Err => Err(ApiError::Network("connection refused".to_string())),
        Reply::Delayed(delay, value) => {
            tokio::time::sleep(delay).await;
            Ok(value)
        }
        Reply::Hang => std::future::pending().await,
    }
}

/// In-memory remote with call counters
pub struct MockApi {
    uploads: Mutex<Script<String>>,
    statuses: Mutex<Script<AnalysisRecord>>,
    batch_uploads: Mutex<Script<BatchAccepted>>,
    batch_fetches: Mutex<Script<BatchDetail>>,
    streams: Mutex<HashMap<BatchHandle, mpsc::UnboundedReceiver<Result<BatchProgressSnapshot, ApiError>>>>,
    fetched_handles: Mutex<Vec<SubmissionHandle>>,

    pub upload_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub batch_upload_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
    pub batch_fetch_calls: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            uploads: Mutex::new(Script::new(vec![Reply::Ok("a1".to_string())])),
            statuses: Mutex::new(Script::new(vec![Reply::Hang])),
            batch_uploads: Mutex::new(Script::new(vec![Reply::Ok(accepted("b1", 3))])),
            batch_fetches: Mutex::new(Script::new(vec![Reply::Ok(batch_detail("b1", 3))])),
            streams: Mutex::new(HashMap::new()),
            fetched_handles: Mutex::new(Vec::new()),
            upload_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            batch_upload_calls: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
            batch_fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Upload replies (analysis ids)
    pub fn with_uploads(self, replies: Vec<Reply<&str>>) -> Self {
        self.set_uploads(replies);
        self
    }

    pub fn set_uploads(&self, replies: Vec<Reply<&str>>) {
        let replies = replies.into_iter().map(|r| map_reply(r, str::to_string)).collect();
        *self.uploads.lock().unwrap() = Script::new(replies);
    }

    /// Status poll replies, one per fetch
    pub fn with_statuses(self, replies: Vec<Reply<AnalysisRecord>>) -> Self {
        self.set_statuses(replies);
        self
    }

    pub fn set_statuses(&self, replies: Vec<Reply<AnalysisRecord>>) {
        *self.statuses.lock().unwrap() = Script::new(replies);
    }

    pub fn with_batch_uploads(self, replies: Vec<Reply<BatchAccepted>>) -> Self {
        *self.batch_uploads.lock().unwrap() = Script::new(replies);
        self
    }

    pub fn with_batch_fetches(self, replies: Vec<Reply<BatchDetail>>) -> Self {
        *self.batch_fetches.lock().unwrap() = Script::new(replies);
        self
    }

    /// Register a progress stream for `handle` and return its feed
    ///
    /// Opening a handle with no registered stream fails with a network
    /// error. Dropping the feed ends the stream.
    pub fn stream(&self, handle: &str) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded();
        self.streams.lock().unwrap().insert(BatchHandle::new(handle), rx);
        tx
    }

    pub fn fetched_handles(&self) -> Vec<SubmissionHandle> {
        self.fetched_handles.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn map_reply<T, U>(reply: Reply<T>, f: impl Fn(T) -> U) -> Reply<U> {
    match reply {
        Reply::Ok(value) => Reply::Ok(f(value)),
        Reply::Err => Reply::Err,
        Reply::Delayed(delay, value) => Reply::Delayed(delay, f(value)),
        Reply::Hang => Reply::Hang,
    }
}

#[async_trait]
impl AnalysisApi for MockApi {
    async fn upload_label(
        &self,
        _upload: &LabelUpload,
        _details: &ApplicationDetails,
    ) -> Result<UploadAccepted, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.uploads.lock().unwrap().next();
        let id = resolve(reply).await?;
        Ok(UploadAccepted {
            analysis_id: SubmissionHandle::new(id),
        })
    }

    async fn fetch_analysis(&self, handle: &SubmissionHandle) -> Result<AnalysisRecord, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_handles.lock().unwrap().push(handle.clone());
        let reply = self.statuses.lock().unwrap().next();
        resolve(reply).await
    }

    async fn list_analyses(&self, query: &HistoryQuery) -> Result<AnalysisPage, ApiError> {
        Ok(AnalysisPage {
            items: Vec::new(),
            total: 0,
            page: query.page,
            page_size: query.page_size,
        })
    }

    async fn upload_batch(
        &self,
        _labels: &[LabelUpload],
        _manifest: Option<&BatchManifest>,
    ) -> Result<BatchAccepted, ApiError> {
        self.batch_upload_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.batch_uploads.lock().unwrap().next();
        resolve(reply).await
    }

    async fn open_batch_stream(&self, handle: &BatchHandle) -> Result<ProgressStream, ApiError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        match self.streams.lock().unwrap().remove(handle) {
            Some(rx) => Ok(rx.boxed()),
            None => Err(ApiError::Network("stream refused".to_string())),
        }
    }

    async fn fetch_batch(&self, _handle: &BatchHandle) -> Result<BatchDetail, ApiError> {
        self.batch_fetch_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.batch_fetches.lock().unwrap().next();
        resolve(reply).await
    }
}

// ========================================
// Builders
// ========================================

pub fn label() -> LabelUpload {
    LabelUpload {
        file_name: "label.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

pub fn record(id: &str, status: AnalysisStatus) -> AnalysisRecord {
    AnalysisRecord {
        id: id.to_string(),
        label_id: format!("label-{}", id),
        status,
        extracted_text: None,
        ocr_confidence: None,
        ocr_duration_ms: None,
        compliance_findings: None,
        application_details: None,
        overall_verdict: None,
        compliance_duration_ms: None,
        detected_beverage_type: None,
        detected_brand_name: None,
        error_message: None,
        total_duration_ms: None,
        created_at: Utc::now(),
    }
}

pub fn failed_record(id: &str, message: &str) -> AnalysisRecord {
    AnalysisRecord {
        error_message: Some(message.to_string()),
        ..record(id, AnalysisStatus::Failed)
    }
}

pub fn status(status: AnalysisStatus) -> Reply<AnalysisRecord> {
    Reply::Ok(record("a1", status))
}

pub fn accepted(id: &str, total: u32) -> BatchAccepted {
    BatchAccepted {
        batch_id: BatchHandle::new(id),
        total_labels: total,
    }
}

pub fn snapshot(status: BatchStatus, total: u32, completed: u32, failed: u32) -> BatchProgressSnapshot {
    BatchProgressSnapshot {
        status,
        total,
        completed,
        failed,
    }
}

pub fn batch_detail(id: &str, count: usize) -> BatchDetail {
    BatchDetail {
        batch: BatchRecord {
            id: id.to_string(),
            status: BatchStatus::Completed,
            total_labels: count as u32,
            completed_labels: count as u32,
            failed_labels: 0,
            created_at: Utc::now(),
        },
        analyses: (0..count)
            .map(|i| record(&format!("{}-{}", id, i), AnalysisStatus::Completed))
            .collect(),
    }
}
