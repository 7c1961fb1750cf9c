//! Batch result materialization
//!
//! Once the watched batch is complete, its full per-item results are fetched
//! exactly once. The [`CompletionGate`] is latched before the fetch starts,
//! so repeated completion signals for the same handle never refetch and a
//! failed fetch is not retried until the session is reset.

use crate::error::TrackingError;
use labelcheck_common::types::{AnalysisRecord, BatchDetail, BatchHandle, BatchRecord};

/// Per-handle "results already requested" latch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionGate {
    latched: Option<BatchHandle>,
}

impl CompletionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch for `handle`; false if it was already latched for it
    pub fn try_latch(&mut self, handle: &BatchHandle) -> bool {
        if self.latched.as_ref() == Some(handle) {
            return false;
        }
        self.latched = Some(handle.clone());
        true
    }

    pub fn is_latched_for(&self, handle: &BatchHandle) -> bool {
        self.latched.as_ref() == Some(handle)
    }

    pub fn clear(&mut self) {
        self.latched = None;
    }
}

#[derive(Debug, Clone)]
pub enum ResultsEvent {
    /// Upload accepted; results now belong to this handle
    Activate(BatchHandle),
    UploadFailed,
    /// Latest subscriber output
    Progress {
        handle: Option<BatchHandle>,
        is_complete: bool,
    },
    FetchSucceeded {
        handle: BatchHandle,
        detail: BatchDetail,
    },
    FetchFailed {
        handle: BatchHandle,
    },
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultsEffect {
    FetchResults(BatchHandle),
}

#[derive(Debug, Default)]
pub struct ResultsTransition {
    pub changed: bool,
    pub effects: Vec<ResultsEffect>,
}

impl ResultsTransition {
    fn changed() -> Self {
        Self {
            changed: true,
            effects: Vec::new(),
        }
    }
}

/// Observable batch results
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    handle: Option<BatchHandle>,
    gate: CompletionGate,
    fetching: bool,
    batch: Option<BatchRecord>,
    analyses: Option<Vec<AnalysisRecord>>,
    error: Option<TrackingError>,
}

impl BatchResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Option<&BatchHandle> {
        self.handle.as_ref()
    }

    pub fn gate(&self) -> &CompletionGate {
        &self.gate
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    pub fn batch(&self) -> Option<&BatchRecord> {
        self.batch.as_ref()
    }

    /// Per-item results, once fetched
    pub fn analyses(&self) -> Option<&[AnalysisRecord]> {
        self.analyses.as_deref()
    }

    pub fn error(&self) -> Option<&TrackingError> {
        self.error.as_ref()
    }

    pub fn step(&mut self, event: ResultsEvent) -> ResultsTransition {
        match event {
            ResultsEvent::Activate(handle) => {
                *self = Self {
                    handle: Some(handle),
                    ..Self::default()
                };
                ResultsTransition::changed()
            }

            ResultsEvent::UploadFailed => {
                *self = Self {
                    error: Some(TrackingError::BatchUploadFailed),
                    ..Self::default()
                };
                ResultsTransition::changed()
            }

            ResultsEvent::Progress {
                handle,
                is_complete,
            } => {
                let Some(current) = self.handle.as_ref() else {
                    return ResultsTransition::default();
                };
                if !is_complete || handle.as_ref() != Some(current) {
                    return ResultsTransition::default();
                }
                if !self.gate.try_latch(current) {
                    return ResultsTransition::default();
                }
                let current = current.clone();
                self.fetching = true;
                ResultsTransition {
                    changed: true,
                    effects: vec![ResultsEffect::FetchResults(current)],
                }
            }

            ResultsEvent::FetchSucceeded { handle, detail } => {
                if self.handle.as_ref() != Some(&handle) || !self.fetching {
                    return ResultsTransition::default();
                }
                self.fetching = false;
                self.batch = Some(detail.batch);
                self.analyses = Some(detail.analyses);
                ResultsTransition::changed()
            }

            ResultsEvent::FetchFailed { handle } => {
                if self.handle.as_ref() != Some(&handle) || !self.fetching {
                    return ResultsTransition::default();
                }
                // Gate stays latched; only a reset allows another fetch
                self.fetching = false;
                self.error = Some(TrackingError::BatchResultFetchFailed);
                ResultsTransition::changed()
            }

            ResultsEvent::Reset => {
                let changed = self.handle.is_some()
                    || self.error.is_some()
                    || self.gate != CompletionGate::default();
                *self = Self::default();
                ResultsTransition {
                    changed,
                    effects: Vec::new(),
                }
            }
        }
    }
}
