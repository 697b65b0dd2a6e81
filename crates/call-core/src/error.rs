//! Error types for the call-session core
//!
//! Errors fall into the categories the engine reacts to differently:
//!
//! - **Session failures** - credential issuance or media join failed. The
//!   session moves to `failed` and waits for a manual reset (`end_call`).
//! - **Record write failures** - a best-effort write to the shared call
//!   record was lost. Logged only; the local session keeps progressing.
//! - **State errors** - an action whose guard does not hold in the current
//!   state. Nothing changes; the caller gets the error back.
//!
//! Events that refer to a session this client already left are not errors
//! at all and never surface here.
//!
//! # Example
//!
//! ```rust,no_run
//! # use homeops_call_core::{CallEngine, CallError, RemoteParty};
//! # async fn example(engine: CallEngine) {
//! match engine.start_call(RemoteParty::new("worker-17", "Sam")).await {
//!     Ok(()) => println!("dialing"),
//!     Err(CallError::SessionActive { status }) => {
//!         println!("already busy ({})", status);
//!     }
//!     Err(e) => eprintln!("could not place call: {}", e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::record::RecordStatus;
use crate::types::CallStatus;

/// Result type for call-core operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors surfaced by the call engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Credential issuance for the media channel failed
    #[error("Credential issuance failed: {reason}")]
    CredentialFailed { reason: String },

    /// Joining the media channel failed
    #[error("Media join failed: {reason}")]
    MediaJoinFailed { reason: String },

    /// A media operation other than join failed (mute, leave)
    #[error("Media error: {details}")]
    MediaError { details: String },

    /// Writing to the shared call record failed
    #[error("Call record write failed: {reason}")]
    RecordWriteFailed { reason: String },

    /// The remote party never joined the media channel in time
    #[error("Connect timeout after {duration_ms}ms")]
    ConnectTimeout { duration_ms: u64 },

    /// A call cannot be started because a session is already active
    #[error("A call session is already active (status: {status})")]
    SessionActive { status: CallStatus },

    /// The action is not valid in the current session state
    #[error("Invalid call state for {action}: current state is {current}")]
    InvalidState {
        action: &'static str,
        current: CallStatus,
    },

    /// The call target is not callable
    #[error("Invalid call target: {reason}")]
    InvalidTarget { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Subscribing to the call record feed failed
    #[error("Subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    /// A status was not reached in time
    #[error("Timed out after {duration_ms}ms waiting for status {status}")]
    WaitTimeout { status: CallStatus, duration_ms: u64 },

    /// The engine task has stopped and no longer accepts commands
    #[error("Call engine is not running")]
    EngineStopped,
}

impl CallError {
    /// Create an invalid-state error
    pub fn invalid_state(action: &'static str, current: CallStatus) -> Self {
        Self::InvalidState { action, current }
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error drives the session into `failed`
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            CallError::CredentialFailed { .. }
                | CallError::MediaJoinFailed { .. }
                | CallError::ConnectTimeout { .. }
        )
    }

    /// Whether this error is a rejected action in the current state
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            CallError::SessionActive { .. } | CallError::InvalidState { .. }
        )
    }
}

/// Errors reported by a call record store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Call record not found: {id}")]
    NotFound { id: String },

    #[error("Call record {id} is terminal ({status}) and cannot be changed")]
    TerminalRecord { id: String, status: RecordStatus },

    #[error("Channel {channel_key} already has an open call record")]
    ChannelBusy { channel_key: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors reported by the media transport gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Join rejected: {reason}")]
    JoinRejected { reason: String },

    #[error("Not joined to a media channel")]
    NotJoined,

    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

/// Errors reported by the credential issuer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Not authorized to join {channel_key}")]
    Unauthorized { channel_key: String },

    #[error("Credential service unreachable: {reason}")]
    Network { reason: String },
}

/// Errors reported by the call history sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("History write failed: {reason}")]
    WriteFailed { reason: String },
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        CallError::RecordWriteFailed {
            reason: err.to_string(),
        }
    }
}

impl From<CredentialError> for CallError {
    fn from(err: CredentialError) -> Self {
        CallError::CredentialFailed {
            reason: err.to_string(),
        }
    }
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        CallError::MediaJoinFailed {
            reason: err.to_string(),
        }
    }
}
