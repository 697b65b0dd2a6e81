//! Shared fixtures for call engine integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use homeops_call_core::memory::{
    HubGateway, InMemoryCallStore, InMemoryHistory, MediaHub, StaticCredentialIssuer,
    StaticDirectory,
};
use homeops_call_core::{
    CallConfig, CallEngine, CallNotification, CallRecord, CallStatus, RemoteParty,
};
use tokio::sync::broadcast;

pub const RING_TIMEOUT: Duration = Duration::from_secs(30);
pub const WAIT: Duration = Duration::from_secs(120);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("homeops_call_core=debug")
        .with_test_writer()
        .try_init();
}

pub struct Client {
    pub id: String,
    pub engine: CallEngine,
    pub gateway: Arc<HubGateway>,
    pub credentials: Arc<StaticCredentialIssuer>,
    pub history: Arc<InMemoryHistory>,
}

impl Client {
    pub fn party(&self) -> RemoteParty {
        RemoteParty::new(self.id.clone(), self.id.to_uppercase())
    }

    pub async fn wait_for(&self, status: CallStatus) {
        if let Err(e) = self.engine.wait_for_status(status, WAIT).await {
            panic!("{} never reached {}: {}", self.id, status, e);
        }
    }

    /// Assert the engine holds no timer, ticker or media lease
    pub async fn assert_released(&self) {
        let diagnostics = self.engine.diagnostics().await.unwrap();
        assert_eq!(diagnostics.status, CallStatus::Idle, "{} not idle", self.id);
        assert!(!diagnostics.timer_armed, "{} still has a timer armed", self.id);
        assert!(!diagnostics.ticker_running, "{} still ticking", self.id);
        assert!(!diagnostics.media_joined, "{} still holds media", self.id);
        assert!(!self.gateway.is_joined(), "{} gateway still joined", self.id);
    }
}

pub struct Harness {
    pub config: CallConfig,
    pub store: Arc<InMemoryCallStore>,
    pub hub: Arc<MediaHub>,
    pub directory: Arc<StaticDirectory>,
}

impl Harness {
    pub fn new() -> Self {
        // Dial timeout outlasts the ring timeout so the callee side resolves
        // unanswered calls
        Self::with_config(
            CallConfig::new()
                .with_ring_timeout(RING_TIMEOUT)
                .with_dial_timeout(RING_TIMEOUT * 2),
        )
    }

    pub fn with_config(config: CallConfig) -> Self {
        init_tracing();
        Self {
            config,
            store: Arc::new(InMemoryCallStore::new()),
            hub: MediaHub::new(),
            directory: StaticDirectory::new(),
        }
    }

    pub async fn client(&self, id: &str) -> Client {
        let gateway = HubGateway::new(self.hub.clone(), id);
        let credentials = StaticCredentialIssuer::new();
        let history = InMemoryHistory::new();
        let engine = CallEngine::builder(id)
            .config(self.config.clone())
            .record_store(self.store.clone())
            .media_gateway(gateway.clone())
            .credential_issuer(credentials.clone())
            .history_sink(history.clone())
            .directory(self.directory.clone())
            .build()
            .await
            .unwrap();
        Client {
            id: id.to_string(),
            engine,
            gateway,
            credentials,
            history,
        }
    }

    /// The only record `caller` has created
    pub fn record_from(&self, caller: &str) -> CallRecord {
        let records = self.store.records_from(caller);
        assert_eq!(records.len(), 1, "expected exactly one record from {}", caller);
        records.into_iter().next().unwrap()
    }

    /// Place a call from `caller` and wait until `callee` rings
    pub async fn ring(&self, caller: &Client, callee: &Client) -> CallRecord {
        caller.engine.start_call(callee.party()).await.unwrap();
        callee.wait_for(CallStatus::Ringing).await;
        self.record_from(&caller.id)
    }

    /// Ring and answer; returns once both sides are connected
    pub async fn connect(&self, caller: &Client, callee: &Client) -> CallRecord {
        self.ring(caller, callee).await;
        callee.engine.accept_call().await.unwrap();
        caller.wait_for(CallStatus::Connected).await;
        callee.wait_for(CallStatus::Connected).await;
        self.record_from(&caller.id)
    }
}

/// Drain every notification currently buffered
pub fn drain(rx: &mut broadcast::Receiver<CallNotification>) -> Vec<CallNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

/// Number of transitions into `status` among `notifications`
pub fn entries_into(notifications: &[CallNotification], status: CallStatus) -> usize {
    notifications
        .iter()
        .filter(|n| matches!(n, CallNotification::StateChanged(change) if change.current == status))
        .count()
}
