//! Call history finalizer
//!
//! When a session returns to idle the finalizer classifies its outcome and
//! appends one [`CallHistoryEntry`] to the history sink.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::HistoryError;
use crate::record::RecordStatus;
use crate::types::ParticipantId;

/// How a call ended, as recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Completed,
    Missed,
    Rejected,
}

impl CallOutcome {
    /// Classify a finished session
    ///
    /// Any connected time makes the call completed. Otherwise the terminal
    /// record status decides between rejected and missed; when the record
    /// could not be written there is nothing but the duration to go by.
    pub fn classify(terminal_status: Option<RecordStatus>, duration_seconds: u64) -> Self {
        if duration_seconds > 0 {
            return CallOutcome::Completed;
        }
        match terminal_status {
            Some(RecordStatus::Rejected) => CallOutcome::Rejected,
            _ => CallOutcome::Missed,
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallOutcome::Completed => "completed",
            CallOutcome::Missed => "missed",
            CallOutcome::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Append-only history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHistoryEntry {
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    pub outcome: CallOutcome,
    pub duration_seconds: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only history storage
#[async_trait]
pub trait CallHistorySink: Send + Sync {
    async fn append(&self, entry: CallHistoryEntry) -> Result<(), HistoryError>;
}

/// Facts about a finished session the finalizer needs
#[derive(Debug, Clone)]
pub struct FinishedCall {
    pub caller_id: ParticipantId,
    pub callee_id: ParticipantId,
    pub terminal_status: Option<RecordStatus>,
    pub duration_seconds: u64,
}

pub struct Finalizer {
    sink: Arc<dyn CallHistorySink>,
}

impl Finalizer {
    pub fn new(sink: Arc<dyn CallHistorySink>) -> Self {
        Self { sink }
    }

    /// Classify and persist. A failed write is logged; the entry is
    /// returned either way so the caller can report the outcome.
    pub async fn finalize(&self, call: FinishedCall) -> CallHistoryEntry {
        let entry = CallHistoryEntry {
            outcome: CallOutcome::classify(call.terminal_status, call.duration_seconds),
            caller_id: call.caller_id,
            callee_id: call.callee_id,
            duration_seconds: call.duration_seconds,
            occurred_at: Utc::now(),
        };

        match self.sink.append(entry.clone()).await {
            Ok(()) => info!(
                "Recorded {} call {} -> {} ({}s)",
                entry.outcome, entry.caller_id, entry.callee_id, entry.duration_seconds
            ),
            Err(e) => warn!("Failed to record call history: {}", e),
        }
        entry
    }
}
