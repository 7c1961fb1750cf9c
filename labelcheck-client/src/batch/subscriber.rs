//! Batch progress subscriber
//!
//! Holds at most one open progress stream, for whichever handle is currently
//! watched. Switching handles closes the previous stream before the next one
//! is opened; dropping the subscriber closes whatever is open.

use super::progress::{BatchProgress, DiscardReason, SubscriberEffect, SubscriberEvent};
use crate::api::AnalysisApi;
use crate::error::ApiError;
use crate::task::OwnedTask;
use futures::StreamExt;
use labelcheck_common::config::{ConnectionLossPolicy, StreamConfig};
use labelcheck_common::types::BatchHandle;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// What a dropped stream means for completion
    pub connection_loss: ConnectionLossPolicy,
}

impl From<&StreamConfig> for SubscriberConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            connection_loss: config.connection_loss,
        }
    }
}

pub struct BatchProgressSubscriber<A: AnalysisApi> {
    api: Arc<A>,
    state: Arc<watch::Sender<BatchProgress>>,
    task: Option<OwnedTask>,
}

impl<A: AnalysisApi> BatchProgressSubscriber<A> {
    pub fn new(api: Arc<A>, config: SubscriberConfig) -> Self {
        let (state, _) = watch::channel(BatchProgress::new(config.connection_loss));
        Self {
            api,
            state: Arc::new(state),
            task: None,
        }
    }

    /// Observe `handle`, or stop observing with `None`
    ///
    /// Watching the handle already watched is a no-op. Otherwise progress is
    /// reset to zeroed counts and the previous stream is closed.
    pub fn watch(&mut self, handle: Option<BatchHandle>) {
        for effect in apply(&self.state, SubscriberEvent::Watch(handle)) {
            match effect {
                SubscriberEffect::Close => {
                    debug!("Closing batch progress stream");
                    self.task = None;
                }
                SubscriberEffect::Open { generation, handle } => {
                    info!(batch_id = %handle, "Subscribing to batch progress");
                    let api = Arc::clone(&self.api);
                    let state = Arc::clone(&self.state);
                    self.task = Some(OwnedTask::spawn(move |cancel| {
                        stream_progress(api, state, generation, handle, cancel)
                    }));
                }
            }
        }
    }

    pub fn handle(&self) -> Option<BatchHandle> {
        self.state.borrow().handle().cloned()
    }

    /// Current progress snapshot
    pub fn progress(&self) -> BatchProgress {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchProgress> {
        self.state.subscribe()
    }
}

fn apply(state: &watch::Sender<BatchProgress>, event: SubscriberEvent) -> Vec<SubscriberEffect> {
    let mut effects = Vec::new();
    state.send_if_modified(|current| {
        let transition = current.step(event);
        effects = transition.effects;

        match transition.discarded {
            Some(DiscardReason::CountsDecreased) => {
                warn!(batch_id = ?current.handle(), status = %current.status(), "Ignoring decreasing progress counts")
            }
            Some(DiscardReason::ExceedsTotal) => {
                warn!(batch_id = ?current.handle(), status = %current.status(), "Ignoring progress counts exceeding batch total")
            }
            None => {}
        }

        if transition.changed && current.is_complete() {
            info!(
                batch_id = ?current.handle(),
                completed = current.completed(),
                failed = current.failed(),
                total = current.total(),
                "Batch progress complete"
            );
        }
        transition.changed
    });
    effects
}

/// Pump one subscription until it closes or is cancelled
async fn stream_progress<A: AnalysisApi>(
    api: Arc<A>,
    state: Arc<watch::Sender<BatchProgress>>,
    generation: u64,
    handle: BatchHandle,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = api.open_batch_stream(&handle) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(batch_id = %handle, error = %e, "Failed to open batch progress stream");
            apply(&state, SubscriberEvent::TransportLost { generation });
            return;
        }
    };
    apply(&state, SubscriberEvent::Connected { generation });

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = stream.next() => item,
        };

        let (event, ended) = match item {
            Some(Ok(snapshot)) => (
                SubscriberEvent::Message {
                    generation,
                    snapshot,
                },
                false,
            ),
            Some(Err(ApiError::Decode(message))) => {
                warn!(batch_id = %handle, "Skipping undecodable progress message: {}", message);
                continue;
            }
            Some(Err(e)) => {
                warn!(batch_id = %handle, error = %e, "Batch progress stream dropped");
                (SubscriberEvent::TransportLost { generation }, true)
            }
            None => {
                warn!(batch_id = %handle, "Batch progress stream ended before completion");
                (SubscriberEvent::TransportLost { generation }, true)
            }
        };

        if apply(&state, event).contains(&SubscriberEffect::Close) || ended {
            debug!(batch_id = %handle, "Batch progress stream closed");
            return;
        }
    }
}
