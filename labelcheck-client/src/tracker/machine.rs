//! Single-item tracker state machine
//!
//! `idle --submit--> uploading --upload ok--> polling --terminal | timeout | fetch error--> done`
//! `uploading --upload fails--> done`, and `reset` returns any phase to `idle`.
//!
//! [`TrackerState::step`] is pure: no I/O and no clock reads. Time arrives
//! inside events, and the driver executes the returned effects.
//!
//! Every event produced by asynchronous work carries the generation it was
//! started under. Submit and reset bump the generation, so a response that
//! lands after either is ignored.

use crate::error::TrackingError;
use labelcheck_common::types::{AnalysisRecord, AnalysisStatus, SubmissionHandle};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle phase of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    /// Nothing submitted (or reset)
    Idle,
    /// Upload request in flight
    Uploading,
    /// Poll loop running against a handle
    Polling,
    /// Terminal status, timeout, or failure observed; no network activity
    Done,
}

/// Input to the machine
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// Fresh submission; discards all prior state
    Submit,
    UploadSucceeded {
        generation: u64,
        handle: SubmissionHandle,
        at: Instant,
    },
    UploadFailed {
        generation: u64,
    },
    /// Poll timer fired (or the budget deadline passed mid-request)
    Tick {
        generation: u64,
        at: Instant,
    },
    StatusFetched {
        generation: u64,
        record: AnalysisRecord,
    },
    StatusFetchFailed {
        generation: u64,
    },
    Reset,
}

/// Side effect requested from the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEffect {
    /// Issue the upload call
    Upload { generation: u64 },
    /// Start the periodic poll timer
    StartPolling { generation: u64, deadline: Instant },
    /// Issue one status fetch, racing the budget deadline
    FetchStatus {
        generation: u64,
        handle: SubmissionHandle,
        deadline: Instant,
    },
    /// Cancel the poll timer and anything in flight
    StopPolling,
}

/// Result of applying one event
#[derive(Debug, Default)]
pub struct Transition {
    /// Observable state changed
    pub changed: bool,
    pub effects: Vec<TrackerEffect>,
}

impl Transition {
    fn ignored() -> Self {
        Self::default()
    }

    fn changed(effects: Vec<TrackerEffect>) -> Self {
        Self {
            changed: true,
            effects,
        }
    }
}

/// Observable tracker state
#[derive(Debug, Clone)]
pub struct TrackerState {
    phase: TrackerPhase,
    generation: u64,
    handle: Option<SubmissionHandle>,
    latest: Option<AnalysisRecord>,
    history: Vec<AnalysisStatus>,
    error: Option<TrackingError>,
    polling_since: Option<Instant>,
    timeout: Duration,
}

impl TrackerState {
    /// Idle state with the given wall-clock polling budget
    pub fn new(timeout: Duration) -> Self {
        Self {
            phase: TrackerPhase::Idle,
            generation: 0,
            handle: None,
            latest: None,
            history: Vec::new(),
            error: None,
            polling_since: None,
            timeout,
        }
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> Option<&SubmissionHandle> {
        self.handle.as_ref()
    }

    /// Last status record received, applied unconditionally
    pub fn latest(&self) -> Option<&AnalysisRecord> {
        self.latest.as_ref()
    }

    /// Every status applied since submit, in arrival order
    pub fn history(&self) -> &[AnalysisStatus] {
        &self.history
    }

    pub fn error(&self) -> Option<&TrackingError> {
        self.error.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.phase == TrackerPhase::Done
    }

    /// Uploading or polling
    pub fn is_active(&self) -> bool {
        matches!(self.phase, TrackerPhase::Uploading | TrackerPhase::Polling)
    }

    fn deadline(&self) -> Option<Instant> {
        self.polling_since
            .and_then(|since| since.checked_add(self.timeout))
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.handle = None;
        self.latest = None;
        self.history.clear();
        self.error = None;
        self.polling_since = None;
    }

    fn finish(&mut self, error: Option<TrackingError>) -> Transition {
        let was_polling = self.phase == TrackerPhase::Polling;
        self.phase = TrackerPhase::Done;
        self.error = error;
        Transition::changed(if was_polling {
            vec![TrackerEffect::StopPolling]
        } else {
            Vec::new()
        })
    }

    fn is_current(&self, generation: u64, phase: TrackerPhase) -> bool {
        self.generation == generation && self.phase == phase
    }

    /// Apply one event
    pub fn step(&mut self, event: TrackerEvent) -> Transition {
        match event {
            TrackerEvent::Submit => {
                let stop = self.is_active();
                self.clear();
                self.phase = TrackerPhase::Uploading;

                let mut effects = Vec::new();
                if stop {
                    effects.push(TrackerEffect::StopPolling);
                }
                effects.push(TrackerEffect::Upload {
                    generation: self.generation,
                });
                Transition::changed(effects)
            }

            TrackerEvent::UploadSucceeded {
                generation,
                handle,
                at,
            } => {
                if !self.is_current(generation, TrackerPhase::Uploading) {
                    return Transition::ignored();
                }
                self.handle = Some(handle);
                let Some(deadline) = at.checked_add(self.timeout) else {
                    return self.finish(Some(TrackingError::PollBudgetOutOfRange));
                };
                self.polling_since = Some(at);
                self.phase = TrackerPhase::Polling;
                Transition::changed(vec![TrackerEffect::StartPolling {
                    generation,
                    deadline,
                }])
            }

            TrackerEvent::UploadFailed { generation } => {
                if !self.is_current(generation, TrackerPhase::Uploading) {
                    return Transition::ignored();
                }
                self.finish(Some(TrackingError::UploadFailed))
            }

            TrackerEvent::Tick { generation, at } => {
                if !self.is_current(generation, TrackerPhase::Polling) {
                    return Transition::ignored();
                }
                let (Some(deadline), Some(handle)) = (self.deadline(), self.handle.clone()) else {
                    return Transition::ignored();
                };

                // Budget check precedes the next request
                if at >= deadline {
                    return self.finish(Some(TrackingError::PollTimedOut));
                }

                Transition {
                    changed: false,
                    effects: vec![TrackerEffect::FetchStatus {
                        generation,
                        handle,
                        deadline,
                    }],
                }
            }

            TrackerEvent::StatusFetched { generation, record } => {
                if !self.is_current(generation, TrackerPhase::Polling) {
                    return Transition::ignored();
                }
                let status = record.status;
                let failure = (status == AnalysisStatus::Failed)
                    .then(|| TrackingError::item_failed(record.error_message.as_deref()));

                self.history.push(status);
                self.latest = Some(record);

                if status.is_terminal() {
                    self.finish(failure)
                } else {
                    Transition::changed(Vec::new())
                }
            }

            TrackerEvent::StatusFetchFailed { generation } => {
                if !self.is_current(generation, TrackerPhase::Polling) {
                    return Transition::ignored();
                }
                self.finish(Some(TrackingError::PollFetchFailed))
            }

            TrackerEvent::Reset => {
                if self.phase == TrackerPhase::Idle {
                    return Transition::ignored();
                }
                let stop = self.is_active();
                self.clear();
                self.phase = TrackerPhase::Idle;
                Transition::changed(if stop {
                    vec![TrackerEffect::StopPolling]
                } else {
                    Vec::new()
                })
            }
        }
    }
}
