//! Session-local types: status, role, remote party and the snapshot the
//! presentation layer reads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an application user taking part in calls
pub type ParticipantId = String;

/// Identifier of a shared call record
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique key binding a call record to a media channel
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelKey(pub String);

impl ChannelKey {
    /// Generate a fresh channel key for a call between two participants
    pub fn generate(caller: &str, callee: &str) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("call_{}_{}_{}", caller, callee, &nonce[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local status of the call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// No call in progress
    Idle,
    /// Outgoing call placed, waiting for the callee to answer
    Dialing,
    /// Incoming call waiting for a local decision
    Ringing,
    /// Call answered, media being established
    Connecting,
    /// Media flowing in both directions
    Connected,
    /// Credential or media setup failed; waiting for a manual reset
    Failed,
}

impl CallStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, CallStatus::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Dialing => "dialing",
            CallStatus::Ringing => "ringing",
            CallStatus::Connecting => "connecting",
            CallStatus::Connected => "connected",
            CallStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the call this client is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRole::Caller => "caller",
            CallRole::Callee => "callee",
        }
    }
}

impl fmt::Display for CallRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The other participant of the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParty {
    pub id: ParticipantId,
    pub display_name: String,
}

impl RemoteParty {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// A party whose display name is not known; the id stands in for it
    pub fn anonymous(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}

/// Point-in-time view of the local call session
///
/// This is what the presentation layer renders. The engine publishes a new
/// snapshot after every event it processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub status: CallStatus,
    /// Id of the associated call record, once created
    pub session_id: Option<RecordId>,
    pub channel_key: Option<ChannelKey>,
    pub role: Option<CallRole>,
    pub remote_party: Option<RemoteParty>,
    pub is_muted: bool,
    /// Seconds spent connected; zero outside `connected`
    pub duration_seconds: u64,
    /// Set only while `failed`
    pub error: Option<String>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            status: CallStatus::Idle,
            session_id: None,
            channel_key: None,
            role: None,
            remote_party: None,
            is_muted: false,
            duration_seconds: 0,
            error: None,
        }
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
