//! Presentation bridge
//!
//! The engine announces every transition as a [`CallNotification`] on a
//! broadcast channel. Ringtones, vibration and toasts live in the
//! presentation layer, which either reads the channel directly or
//! implements [`CallEventHandler`] and lets [`spawn_event_handler`] drive it.
//! Handlers run on their own task; the engine never waits for them.
//!
//! ```rust
//! use homeops_call_core::events::{CallEventHandler, StateChange};
//! use homeops_call_core::{CallOutcome, CallStatus, RecordId};
//! use async_trait::async_trait;
//!
//! struct Ringer;
//!
//! #[async_trait]
//! impl CallEventHandler for Ringer {
//!     async fn on_state_changed(&self, change: StateChange) {
//!         if change.current == CallStatus::Ringing {
//!             println!("ring ring");
//!         }
//!     }
//!
//!     async fn on_call_ended(&self, _session_id: RecordId, outcome: CallOutcome, _duration_seconds: u64) {
//!         println!("call {}", outcome);
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::history::CallOutcome;
use crate::types::{CallRole, CallStatus, RecordId, RemoteParty};

/// A status transition of the local session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub previous: CallStatus,
    pub current: CallStatus,
    pub session_id: Option<RecordId>,
    pub role: Option<CallRole>,
    pub remote_party: Option<RemoteParty>,
    pub timestamp: DateTime<Utc>,
}

/// Notifications published by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallNotification {
    StateChanged(StateChange),
    /// The session ended after being connected
    Ended {
        session_id: RecordId,
        duration_seconds: u64,
    },
    /// The session ended unanswered
    Missed { session_id: RecordId },
    /// The session ended because one side declined
    Rejected { session_id: RecordId },
    /// Setup failed; the session waits in `failed` for a reset
    Failed {
        session_id: Option<RecordId>,
        message: String,
    },
    MuteChanged { is_muted: bool },
    DurationTick { duration_seconds: u64 },
}

impl CallNotification {
    /// The notification announcing a finished session
    pub fn for_outcome(session_id: RecordId, outcome: CallOutcome, duration_seconds: u64) -> Self {
        match outcome {
            CallOutcome::Completed => CallNotification::Ended {
                session_id,
                duration_seconds,
            },
            CallOutcome::Missed => CallNotification::Missed { session_id },
            CallOutcome::Rejected => CallNotification::Rejected { session_id },
        }
    }
}

/// Callback interface for presentation code
#[async_trait]
pub trait CallEventHandler: Send + Sync {
    async fn on_state_changed(&self, change: StateChange);

    async fn on_call_ended(&self, _session_id: RecordId, _outcome: CallOutcome, _duration_seconds: u64) {}

    async fn on_call_failed(&self, _session_id: Option<RecordId>, _message: String) {}

    async fn on_mute_changed(&self, _is_muted: bool) {}

    async fn on_duration_tick(&self, _duration_seconds: u64) {}

    /// Route a notification to the specific callbacks
    async fn on_notification(&self, notification: CallNotification) {
        match notification {
            CallNotification::StateChanged(change) => self.on_state_changed(change).await,
            CallNotification::Ended {
                session_id,
                duration_seconds,
            } => {
                self.on_call_ended(session_id, CallOutcome::Completed, duration_seconds)
                    .await
            }
            CallNotification::Missed { session_id } => {
                self.on_call_ended(session_id, CallOutcome::Missed, 0).await
            }
            CallNotification::Rejected { session_id } => {
                self.on_call_ended(session_id, CallOutcome::Rejected, 0).await
            }
            CallNotification::Failed {
                session_id,
                message,
            } => self.on_call_failed(session_id, message).await,
            CallNotification::MuteChanged { is_muted } => self.on_mute_changed(is_muted).await,
            CallNotification::DurationTick { duration_seconds } => {
                self.on_duration_tick(duration_seconds).await
            }
        }
    }
}

/// Drive `handler` from a notification stream until the engine goes away
pub fn spawn_event_handler(
    mut notifications: broadcast::Receiver<CallNotification>,
    handler: Arc<dyn CallEventHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => handler.on_notification(notification).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Call event handler lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
