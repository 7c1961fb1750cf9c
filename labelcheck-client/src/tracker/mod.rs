//! Single-item progress tracker
//!
//! Turns a fire-and-forget label upload into an observable, cancellable,
//! time-bounded progress stream:
//!
//! 1. `submit` uploads the label and records the returned handle
//! 2. a fixed-interval poll loop re-fetches the status record
//! 3. the loop ends on a terminal status, a fetch error, or when the
//!    wall-clock budget runs out, whichever comes first
//!
//! The state machine lives in [`machine`]; this module is the driver that
//! owns the poll task and performs the I/O it asks for.

pub mod machine;

pub use machine::{TrackerEffect, TrackerEvent, TrackerPhase, TrackerState};

use crate::api::{AnalysisApi, LabelUpload};
use crate::task::OwnedTask;
use labelcheck_common::config::{PollingConfig, MAX_POLL_INTERVAL_MS, MAX_POLL_TIMEOUT_SECS};
use labelcheck_common::types::ApplicationDetails;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll cadence and budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Time between status fetches (default: 1s)
    pub poll_interval: Duration,
    /// Wall-clock budget measured from the start of polling (default: 5min)
    pub poll_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(300),
        }
    }
}

impl TrackerConfig {
    /// Clamp into the range the config file accepts
    pub fn bounded(self) -> Self {
        Self {
            poll_interval: self.poll_interval.clamp(
                Duration::from_millis(1),
                Duration::from_millis(MAX_POLL_INTERVAL_MS),
            ),
            poll_timeout: self
                .poll_timeout
                .min(Duration::from_secs(MAX_POLL_TIMEOUT_SECS)),
        }
    }
}

impl From<&PollingConfig> for TrackerConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_interval: config.interval(),
            poll_timeout: config.timeout(),
        }
    }
}

/// Tracks one submission at a time
///
/// Must be used from within a tokio runtime. Dropping the tracker cancels
/// any running poll loop.
pub struct SubmissionTracker<A: AnalysisApi> {
    api: Arc<A>,
    config: TrackerConfig,
    state: Arc<watch::Sender<TrackerState>>,
    task: Option<OwnedTask>,
}

impl<A: AnalysisApi> SubmissionTracker<A> {
    /// `config` is clamped with [`TrackerConfig::bounded`]
    pub fn new(api: Arc<A>, config: TrackerConfig) -> Self {
        let config = config.bounded();
        let (state, _) = watch::channel(TrackerState::new(config.poll_timeout));
        Self {
            api,
            config,
            state: Arc::new(state),
            task: None,
        }
    }

    /// Start tracking a fresh submission
    ///
    /// Any previous submission is reset first: its task is cancelled and its
    /// handle, status, and error are discarded.
    pub fn submit(&mut self, upload: LabelUpload, details: ApplicationDetails) {
        self.reset();

        info!(file = %upload.file_name, "Submitting label for analysis");
        let effects = apply(&self.state, TrackerEvent::Submit);

        let driver = Driver {
            api: Arc::clone(&self.api),
            state: Arc::clone(&self.state),
            poll_interval: self.config.poll_interval,
            upload,
            details,
        };
        self.task = Some(OwnedTask::spawn(move |cancel| driver.run(effects, cancel)));
    }

    /// Cancel any active work and return to idle; safe from any phase
    pub fn reset(&mut self) {
        // Dropping the task cancels its timer and any request in flight
        self.task = None;
        apply(&self.state, TrackerEvent::Reset);
    }

    /// Current state snapshot
    pub fn view(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every observable change
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    /// Wait until nothing is in flight (`idle` or `done`)
    pub async fn wait_until_settled(&self) -> TrackerState {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|state| !state.is_active()).await {
            Ok(state) => state.clone(),
            // Sender lives in self; unreachable while borrowed
            Err(_) => self.view(),
        };
        settled
    }
}

/// Apply one event, publish the change, and return the requested effects
fn apply(state: &watch::Sender<TrackerState>, event: TrackerEvent) -> Vec<TrackerEffect> {
    let mut effects = Vec::new();
    state.send_if_modified(|current| {
        let transition = current.step(event);
        effects = transition.effects;

        if transition.changed && current.is_done() {
            match current.error() {
                Some(error) => warn!(
                    analysis_id = current.handle().map(|h| h.as_str()).unwrap_or("-"),
                    "Tracking finished: {}",
                    error
                ),
                None => info!(
                    analysis_id = current.handle().map(|h| h.as_str()).unwrap_or("-"),
                    "Analysis completed"
                ),
            }
        }
        transition.changed
    });
    effects
}

/// State owned by one submission's background task
struct Driver<A: AnalysisApi> {
    api: Arc<A>,
    state: Arc<watch::Sender<TrackerState>>,
    poll_interval: Duration,
    upload: LabelUpload,
    details: ApplicationDetails,
}

impl<A: AnalysisApi> Driver<A> {
    /// Execute effects until the machine stops asking for work
    ///
    /// At most one request is in flight at a time; ticks missed while a
    /// fetch is pending are skipped.
    async fn run(self, initial: Vec<TrackerEffect>, cancel: CancellationToken) {
        let mut pending: VecDeque<TrackerEffect> = initial.into();
        let mut ticker = None;

        loop {
            while let Some(effect) = pending.pop_front() {
                let event = match effect {
                    TrackerEffect::Upload { generation } => {
                        let result = tokio::select! {
                            _ = cancel.cancelled() => return,
                            result = self.api.upload_label(&self.upload, &self.details) => result,
                        };
                        match result {
                            Ok(accepted) => {
                                info!(analysis_id = %accepted.analysis_id, "Upload accepted, polling status");
                                TrackerEvent::UploadSucceeded {
                                    generation,
                                    handle: accepted.analysis_id,
                                    at: Instant::now(),
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Label upload failed");
                                TrackerEvent::UploadFailed { generation }
                            }
                        }
                    }

                    TrackerEffect::StartPolling { generation, .. } => {
                        let mut timer =
                            interval_at(Instant::now() + self.poll_interval, self.poll_interval);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        ticker = Some((generation, timer));
                        continue;
                    }

                    TrackerEffect::FetchStatus {
                        generation,
                        handle,
                        deadline,
                    } => {
                        debug!(analysis_id = %handle, "Polling analysis status");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            // A hanging request cannot stretch the budget
                            _ = sleep_until(deadline) => TrackerEvent::Tick {
                                generation,
                                at: Instant::now(),
                            },
                            result = self.api.fetch_analysis(&handle) => match result {
                                Ok(record) => {
                                    debug!(analysis_id = %handle, status = %record.status, "Status received");
                                    TrackerEvent::StatusFetched { generation, record }
                                }
                                Err(e) => {
                                    warn!(analysis_id = %handle, error = %e, "Status fetch failed");
                                    TrackerEvent::StatusFetchFailed { generation }
                                }
                            },
                        }
                    }

                    TrackerEffect::StopPolling => {
                        ticker = None;
                        continue;
                    }
                };

                pending.extend(apply(&self.state, event));
            }

            let Some((generation, timer)) = ticker.as_mut() else {
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = timer.tick() => {
                    let event = TrackerEvent::Tick { generation: *generation, at: Instant::now() };
                    pending.extend(apply(&self.state, event));
                }
            }
        }
    }
}
