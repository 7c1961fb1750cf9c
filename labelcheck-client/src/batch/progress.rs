//! Batch progress subscription state machine
//!
//! Tracks one live server-push subscription per batch handle. Pure: the
//! driver in [`super::subscriber`] opens and closes the actual stream.

use crate::error::TrackingError;
use labelcheck_common::config::ConnectionLossPolicy;
use labelcheck_common::types::{BatchHandle, BatchProgressSnapshot, BatchStatus};

/// Connection lifecycle of the current subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle, no subscription
    Inactive,
    /// Stream requested, not yet open
    Connecting,
    /// Receiving messages
    Open,
    /// Closed after a terminal snapshot or a transport error
    Closed,
}

#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// Observe a different handle (or none)
    Watch(Option<BatchHandle>),
    Connected {
        generation: u64,
    },
    Message {
        generation: u64,
        snapshot: BatchProgressSnapshot,
    },
    /// Stream dropped, could not connect, or ended before a terminal snapshot
    TransportLost {
        generation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEffect {
    Open { generation: u64, handle: BatchHandle },
    Close,
}

/// Why a pushed snapshot's counts were not published
///
/// A terminal snapshot is still applied for its status; only its counts
/// are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// `completed` or `failed` went backwards
    CountsDecreased,
    /// `completed + failed` exceeds a known total
    ExceedsTotal,
}

#[derive(Debug, Default)]
pub struct SubscriberTransition {
    pub changed: bool,
    pub effects: Vec<SubscriberEffect>,
    pub discarded: Option<DiscardReason>,
}

impl SubscriberTransition {
    fn changed(effects: Vec<SubscriberEffect>) -> Self {
        Self {
            changed: true,
            effects,
            discarded: None,
        }
    }

    fn discarded(reason: DiscardReason) -> Self {
        Self {
            discarded: Some(reason),
            ..Default::default()
        }
    }
}

/// Observable batch progress
#[derive(Debug, Clone)]
pub struct BatchProgress {
    handle: Option<BatchHandle>,
    generation: u64,
    snapshot: BatchProgressSnapshot,
    is_complete: bool,
    error: Option<TrackingError>,
    connection: ConnectionState,
    policy: ConnectionLossPolicy,
}

impl BatchProgress {
    pub fn new(policy: ConnectionLossPolicy) -> Self {
        Self {
            handle: None,
            generation: 0,
            snapshot: BatchProgressSnapshot::default(),
            is_complete: false,
            error: None,
            connection: ConnectionState::Inactive,
            policy,
        }
    }

    pub fn handle(&self) -> Option<&BatchHandle> {
        self.handle.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Latest accepted snapshot (zeroed default when inactive)
    pub fn snapshot(&self) -> &BatchProgressSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> BatchStatus {
        self.snapshot.status
    }

    pub fn total(&self) -> u32 {
        self.snapshot.total
    }

    pub fn completed(&self) -> u32 {
        self.snapshot.completed
    }

    pub fn failed(&self) -> u32 {
        self.snapshot.failed
    }

    /// Terminal snapshot seen, or the connection was lost under
    /// [`ConnectionLossPolicy::Complete`]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn error(&self) -> Option<&TrackingError> {
        self.error.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn policy(&self) -> ConnectionLossPolicy {
        self.policy
    }

    fn is_subscribed(&self) -> bool {
        matches!(self.connection, ConnectionState::Connecting | ConnectionState::Open)
    }

    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && self.is_subscribed()
    }

    pub fn step(&mut self, event: SubscriberEvent) -> SubscriberTransition {
        match event {
            SubscriberEvent::Watch(handle) => {
                if handle == self.handle {
                    return SubscriberTransition::default();
                }

                let mut effects = Vec::new();
                if self.is_subscribed() {
                    effects.push(SubscriberEffect::Close);
                }

                self.generation += 1;
                self.snapshot = BatchProgressSnapshot::default();
                self.is_complete = false;
                self.error = None;
                self.handle = handle.clone();

                match handle {
                    Some(handle) => {
                        self.connection = ConnectionState::Connecting;
                        effects.push(SubscriberEffect::Open {
                            generation: self.generation,
                            handle,
                        });
                    }
                    None => self.connection = ConnectionState::Inactive,
                }
                SubscriberTransition::changed(effects)
            }

            SubscriberEvent::Connected { generation } => {
                if !self.accepts(generation) || self.connection == ConnectionState::Open {
                    return SubscriberTransition::default();
                }
                self.connection = ConnectionState::Open;
                SubscriberTransition::changed(Vec::new())
            }

            SubscriberEvent::Message {
                generation,
                snapshot,
            } => {
                if !self.accepts(generation) {
                    return SubscriberTransition::default();
                }

                let rejected = if snapshot.regresses_from(&self.snapshot) {
                    Some(DiscardReason::CountsDecreased)
                } else if !snapshot.is_within_total() {
                    Some(DiscardReason::ExceedsTotal)
                } else {
                    None
                };

                if !snapshot.is_terminal() {
                    if let Some(reason) = rejected {
                        return SubscriberTransition::discarded(reason);
                    }
                    self.snapshot = snapshot;
                    self.connection = ConnectionState::Open;
                    return SubscriberTransition::changed(Vec::new());
                }

                // Terminal status always ends the subscription; bad counts
                // keep the last accepted ones
                self.snapshot = match rejected {
                    Some(_) => BatchProgressSnapshot {
                        status: snapshot.status,
                        ..self.snapshot
                    },
                    None => snapshot,
                };
                self.is_complete = true;
                self.connection = ConnectionState::Closed;
                SubscriberTransition {
                    changed: true,
                    effects: vec![SubscriberEffect::Close],
                    discarded: rejected,
                }
            }

            SubscriberEvent::TransportLost { generation } => {
                if !self.accepts(generation) {
                    return SubscriberTransition::default();
                }
                self.error = Some(TrackingError::StreamConnectionLost);
                self.connection = ConnectionState::Closed;
                if self.policy == ConnectionLossPolicy::Complete {
                    self.is_complete = true;
                }
                SubscriberTransition::changed(vec![SubscriberEffect::Close])
            }
        }
    }
}
