//! # HomeOps Call Core
//!
//! Call-session signaling core for peer-to-peer voice calls between
//! application users.
//!
//! Two clients coordinate through a shared, durable [`CallRecord`] and talk
//! over an external media transport. Each client runs one [`CallEngine`],
//! which owns the local session and guarantees at most one non-idle session
//! at a time, even when local actions race with record updates, presence
//! callbacks and timeouts.
//!
//! This crate provides:
//! - The call session state machine, driven by a single engine task
//! - A ring/dial/connect timeout supervisor with explicit `arm`/`disarm`
//! - A typed adapter over the call record change feed
//! - A binding to the media transport gateway and credential issuer
//! - A history finalizer that classifies finished calls
//! - Notifications for the presentation layer
//! - In-memory backends for all external collaborators
//!
//! ## Architecture
//!
//! ```text
//! user action ──┐
//! record feed ──┼──> engine inbox ──> SessionMachine ──> watch<CallSnapshot>
//! gateway ──────┤                        │      │     └─> broadcast<CallNotification>
//! timers/ticks ─┘                        │      └──> MediaBinding (join/leave/mute)
//!                                        └──> CallRecordStore (best-effort writes)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use homeops_call_core::memory::{
//!     HubGateway, InMemoryCallStore, InMemoryHistory, MediaHub, StaticCredentialIssuer,
//! };
//! use homeops_call_core::{CallEngine, CallStatus, RemoteParty};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> homeops_call_core::CallResult<()> {
//! let store = Arc::new(InMemoryCallStore::new());
//! let hub = MediaHub::new();
//!
//! let dispatcher = CallEngine::builder("dispatcher-1")
//!     .record_store(store.clone())
//!     .media_gateway(HubGateway::new(hub.clone(), "dispatcher-1"))
//!     .credential_issuer(StaticCredentialIssuer::new())
//!     .history_sink(InMemoryHistory::new())
//!     .build()
//!     .await?;
//!
//! dispatcher.start_call(RemoteParty::new("worker-17", "Sam")).await?;
//! dispatcher
//!     .wait_for_status(CallStatus::Connected, Duration::from_secs(30))
//!     .await?;
//! dispatcher.end_call().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod history;
pub mod media;
pub mod memory;
pub mod record;
pub mod session;
pub mod ticker;
pub mod timeout;
pub mod types;

pub use config::CallConfig;
pub use directory::{NoDirectory, PartyDirectory};
pub use error::{CallError, CallResult, CredentialError, HistoryError, MediaError, StoreError};
pub use events::{spawn_event_handler, CallEventHandler, CallNotification, StateChange};
pub use history::{CallHistoryEntry, CallHistorySink, CallOutcome, Finalizer, FinishedCall};
pub use media::{
    CredentialIssuer, GatewayEvent, JoinRequest, MediaBinding, MediaCredential, MediaGateway,
    MediaLease,
};
pub use record::{
    CallRecord, CallRecordStore, RecordChange, RecordFeed, RecordStatus, RecordStoreAdapter,
    RecordUpdate, SignalingEvent, Subscription,
};
pub use session::{CallEngine, CallEngineBuilder, EngineDiagnostics};
pub use timeout::{TimeoutSupervisor, TimerHandle};
pub use types::{CallRole, CallSnapshot, CallStatus, ChannelKey, ParticipantId, RecordId, RemoteParty};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
