//! Shared call records and the store they live in
//!
//! A [`CallRecord`] coordinates two clients for one call attempt. The caller
//! creates it at dial time; either side moves it forward until it reaches a
//! terminal status, after which it never changes again.
//!
//! The store itself is an external platform. This module defines the
//! contract ([`CallRecordStore`]) and the typed feed adapter that turns
//! raw change notifications into signaling events.

pub mod adapter;

pub use adapter::{RecordStoreAdapter, SignalingEvent};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::types::{ChannelKey, ParticipantId, RecordId};

/// Status of a shared call record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ringing,
    Connecting,
    Connected,
    Rejected,
    Missed,
    Ended,
}

impl RecordStatus {
    /// Terminal statuses are immutable once written
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Rejected | RecordStatus::Missed | RecordStatus::Ended
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Ringing => "ringing",
            RecordStatus::Connecting => "connecting",
            RecordStatus::Connected => "connected",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Missed => "missed",
            RecordStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record shared by both participants of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: RecordId,
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    pub channel_key: ChannelKey,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    /// Build the record a caller inserts at dial time
    pub fn ringing(
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
        channel_key: ChannelKey,
    ) -> Self {
        Self {
            id: RecordId::new(),
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            channel_key,
            status: RecordStatus::Ringing,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
        }
    }

    /// Whether the participant takes part in this call
    pub fn involves(&self, participant: &str) -> bool {
        self.caller_id == participant || self.callee_id == participant
    }
}

/// Point update applied to a record by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub status: RecordStatus,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status,
            answered_at: None,
            ended_at: None,
        }
    }

    /// Move to `connected` and stamp `answered_at`
    pub fn answered() -> Self {
        Self {
            status: RecordStatus::Connected,
            answered_at: Some(Utc::now()),
            ended_at: None,
        }
    }

    /// Move to a terminal status and stamp `ended_at`
    pub fn terminal(status: RecordStatus) -> Self {
        Self {
            status,
            answered_at: None,
            ended_at: Some(Utc::now()),
        }
    }
}

/// Raw change notification delivered by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    /// A new record was inserted with `callee_id` equal to the subscriber
    Inserted(CallRecord),
    /// Any record was updated
    Updated(CallRecord),
}

/// Stream of changes plus the handle that ends the subscription
pub struct RecordFeed {
    pub changes: mpsc::UnboundedReceiver<RecordChange>,
    pub subscription: Subscription,
}

/// Unsubscribe handle
///
/// The release callback runs exactly once: on [`Subscription::unsubscribe`]
/// or on drop, whichever comes first.
pub struct Subscription {
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// A subscription with nothing to release
    pub fn noop() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    /// Release the subscription. Returns false if it was already released.
    pub fn unsubscribe(&self) -> bool {
        let release = self.release.lock().take();
        match release {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Contract of the durable call record store
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Insert a new record. The store refuses a second open record on the
    /// same channel key.
    async fn create(&self, record: CallRecord) -> Result<CallRecord, StoreError>;

    /// Apply a point update keyed by record id
    async fn update(&self, id: &RecordId, update: RecordUpdate) -> Result<CallRecord, StoreError>;

    /// Subscribe to inserts for `participant` (as callee) and to all updates
    async fn subscribe(&self, participant: &str) -> Result<RecordFeed, StoreError>;
}
