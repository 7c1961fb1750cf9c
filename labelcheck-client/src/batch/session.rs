//! Batch session: upload, live progress, then full results
//!
//! Composes a [`BatchProgressSubscriber`] with the result materializer.
//! A background watcher follows the subscriber's output and performs the
//! single results fetch once the batch completes.

use super::progress::BatchProgress;
use super::results::{BatchResults, ResultsEffect, ResultsEvent};
use super::subscriber::{BatchProgressSubscriber, SubscriberConfig};
use crate::api::{AnalysisApi, BatchManifest, LabelUpload};
use crate::error::TrackingError;
use crate::task::OwnedTask;
use labelcheck_common::types::{BatchAccepted, BatchHandle};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Combined progress and results at one instant
#[derive(Debug, Clone)]
pub struct BatchView {
    pub progress: BatchProgress,
    pub results: BatchResults,
}

impl BatchView {
    pub fn handle(&self) -> Option<&BatchHandle> {
        self.results.handle()
    }

    /// Most relevant user-visible error, results first
    pub fn error(&self) -> Option<&TrackingError> {
        self.results.error().or_else(|| self.progress.error())
    }

    /// Nothing left to wait for
    ///
    /// True when idle, after an upload failure, once results (or their
    /// failure) are in, or when the stream was lost without completing.
    pub fn is_settled(&self) -> bool {
        if self.results.handle().is_none() {
            return true;
        }
        if self.results.analyses().is_some() || self.results.error().is_some() {
            return true;
        }
        self.progress.error().is_some() && !self.progress.is_complete()
    }
}

pub struct BatchSession<A: AnalysisApi> {
    api: Arc<A>,
    subscriber: BatchProgressSubscriber<A>,
    results: Arc<watch::Sender<BatchResults>>,
    watcher: Option<OwnedTask>,
}

impl<A: AnalysisApi> BatchSession<A> {
    pub fn new(api: Arc<A>, config: SubscriberConfig) -> Self {
        let (results, _) = watch::channel(BatchResults::new());
        Self {
            subscriber: BatchProgressSubscriber::new(Arc::clone(&api), config),
            api,
            results: Arc::new(results),
            watcher: None,
        }
    }

    /// Upload a batch and start following it
    ///
    /// Resets any previous batch first. On success the returned handle is
    /// already being watched.
    pub async fn submit(
        &mut self,
        labels: &[LabelUpload],
        manifest: Option<&BatchManifest>,
    ) -> Result<BatchAccepted, TrackingError> {
        self.reset();

        info!(labels = labels.len(), manifest = manifest.is_some(), "Uploading batch");
        let accepted = match self.api.upload_batch(labels, manifest).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Batch upload failed");
                apply(&self.results, ResultsEvent::UploadFailed);
                return Err(TrackingError::BatchUploadFailed);
            }
        };
        info!(batch_id = %accepted.batch_id, total = accepted.total_labels, "Batch accepted");

        apply(&self.results, ResultsEvent::Activate(accepted.batch_id.clone()));
        self.subscriber.watch(Some(accepted.batch_id.clone()));

        let api = Arc::clone(&self.api);
        let progress = self.subscriber.subscribe();
        let results = Arc::clone(&self.results);
        self.watcher = Some(OwnedTask::spawn(move |cancel| {
            materialize(api, progress, results, cancel)
        }));

        Ok(accepted)
    }

    /// Drop the current batch: close the stream, forget results, clear the gate
    pub fn reset(&mut self) {
        self.watcher = None;
        self.subscriber.watch(None);
        apply(&self.results, ResultsEvent::Reset);
    }

    pub fn view(&self) -> BatchView {
        BatchView {
            progress: self.subscriber.progress(),
            results: self.results.borrow().clone(),
        }
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<BatchProgress> {
        self.subscriber.subscribe()
    }

    pub fn subscribe_results(&self) -> watch::Receiver<BatchResults> {
        self.results.subscribe()
    }

    /// Wait until [`BatchView::is_settled`]
    pub async fn wait_until_settled(&self) -> BatchView {
        let mut progress = self.subscriber.subscribe();
        let mut results = self.results.subscribe();

        loop {
            let view = self.view();
            if view.is_settled() {
                return view;
            }
            let closed = tokio::select! {
                changed = progress.changed() => changed.is_err(),
                changed = results.changed() => changed.is_err(),
            };
            if closed {
                return self.view();
            }
        }
    }
}

fn apply(state: &watch::Sender<BatchResults>, event: ResultsEvent) -> Vec<ResultsEffect> {
    let mut effects = Vec::new();
    state.send_if_modified(|current| {
        let transition = current.step(event);
        effects = transition.effects;
        transition.changed
    });
    effects
}

/// Follow subscriber output and fetch results once the batch completes
async fn materialize<A: AnalysisApi>(
    api: Arc<A>,
    mut progress: watch::Receiver<BatchProgress>,
    results: Arc<watch::Sender<BatchResults>>,
    cancel: CancellationToken,
) {
    loop {
        let event = {
            let current = progress.borrow_and_update();
            ResultsEvent::Progress {
                handle: current.handle().cloned(),
                is_complete: current.is_complete(),
            }
        };

        for effect in apply(&results, event) {
            let ResultsEffect::FetchResults(handle) = effect;
            info!(batch_id = %handle, "Fetching batch results");

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = api.fetch_batch(&handle) => fetched,
            };
            let event = match fetched {
                Ok(detail) => {
                    info!(batch_id = %handle, analyses = detail.analyses.len(), "Batch results received");
                    ResultsEvent::FetchSucceeded { handle, detail }
                }
                Err(e) => {
                    warn!(batch_id = %handle, error = %e, "Batch results fetch failed");
                    ResultsEvent::FetchFailed { handle }
                }
            };
            apply(&results, event);
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = progress.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
