//! Scripted call scenarios run against in-memory backends

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use homeops_call_core::memory::{
    HubGateway, InMemoryCallStore, InMemoryHistory, MediaHub, StaticCredentialIssuer,
    StaticDirectory,
};
use homeops_call_core::{
    CallConfig, CallEngine, CallHistoryEntry, CallRecord, CallStatus, CredentialError,
    RemoteParty,
};
use tracing::info;

/// One simulated client with its own gateway, issuer and history
pub struct Participant {
    pub id: String,
    pub engine: CallEngine,
    pub gateway: Arc<HubGateway>,
    pub credentials: Arc<StaticCredentialIssuer>,
    pub history: Arc<InMemoryHistory>,
}

impl Participant {
    pub fn party(&self) -> RemoteParty {
        RemoteParty::new(self.id.clone(), display_name(&self.id))
    }
}

/// Shared store and media hub with any number of participants
pub struct Rig {
    pub config: CallConfig,
    pub store: Arc<InMemoryCallStore>,
    pub hub: Arc<MediaHub>,
    directory: Arc<StaticDirectory>,
}

impl Rig {
    pub fn new(config: CallConfig) -> Self {
        let directory = StaticDirectory::new();
        for id in ["alice", "bob", "carol"] {
            directory.insert(id, display_name(id));
        }
        Self {
            config,
            store: Arc::new(InMemoryCallStore::new()),
            hub: MediaHub::new(),
            directory,
        }
    }

    pub async fn join(&self, id: &str) -> Result<Participant> {
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
            .with_context(|| format!("starting engine for {}", id))?;
        Ok(Participant {
            id: id.to_string(),
            engine,
            gateway,
            credentials,
            history,
        })
    }

    /// The single record `caller` created
    pub fn record_from(&self, caller: &str) -> Result<CallRecord> {
        let mut records = self.store.records_from(caller);
        match records.len() {
            1 => Ok(records.remove(0)),
            n => bail!("expected one record from {}, found {}", caller, n),
        }
    }
}

/// What a scenario left behind
pub struct ScenarioReport {
    pub name: &'static str,
    pub records: Vec<CallRecord>,
    pub history: Vec<(String, CallHistoryEntry)>,
    pub notes: Vec<String>,
}

impl ScenarioReport {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            records: Vec::new(),
            history: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!("{}", note);
        self.notes.push(note);
    }

    fn collect(&mut self, rig: &Rig, participants: &[&Participant]) {
        self.records = rig.store.records();
        for participant in participants {
            for entry in participant.history.entries() {
                self.history.push((participant.id.clone(), entry));
            }
        }
    }
}

fn display_name(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn wait_budget(config: &CallConfig) -> Duration {
    config.ring_timeout().max(config.dial_timeout()) + config.connect_timeout()
}

async fn shutdown(participants: &[&Participant]) -> Result<()> {
    for participant in participants {
        participant.engine.shutdown().await?;
    }
    Ok(())
}

/// Alice calls Bob, Bob answers, they talk, Alice hangs up
pub async fn happy_path(rig: &Rig, talk: Duration) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("happy-path");
    let alice = rig.join("alice").await?;
    let bob = rig.join("bob").await?;
    let budget = wait_budget(&rig.config);

    alice.engine.start_call(bob.party()).await?;
    report.note("alice dialing bob");
    let ringing = bob.engine.wait_for_status(CallStatus::Ringing, budget).await?;
    report.note(format!(
        "bob ringing, call from {}",
        ringing
            .remote_party
            .map(|p| p.display_name)
            .unwrap_or_default()
    ));

    bob.engine.accept_call().await?;
    report.note("bob accepted");
    alice.engine.wait_for_status(CallStatus::Connected, budget).await?;
    bob.engine.wait_for_status(CallStatus::Connected, budget).await?;
    report.note("both connected");

    let muted = bob.engine.toggle_mute().await?;
    report.note(format!(
        "bob toggled mute: {} (gateway muted: {})",
        muted,
        bob.gateway.is_muted()
    ));

    tokio::time::sleep(talk).await;
    let talked = alice.engine.snapshot().duration_seconds;
    alice.engine.end_call().await?;
    report.note(format!("alice hung up after {}s", talked));
    bob.engine.wait_for_status(CallStatus::Idle, budget).await?;

    report.collect(rig, &[&alice, &bob]);
    shutdown(&[&alice, &bob]).await?;
    Ok(report)
}

/// Alice calls Bob, nobody answers
pub async fn missed(rig: &Rig) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("missed");
    let alice = rig.join("alice").await?;
    let bob = rig.join("bob").await?;
    let budget = wait_budget(&rig.config);

    alice.engine.start_call(bob.party()).await?;
    bob.engine.wait_for_status(CallStatus::Ringing, budget).await?;
    report.note(format!("bob ringing, waiting {:?}", rig.config.ring_timeout()));

    bob.engine.wait_for_status(CallStatus::Idle, budget).await?;
    alice.engine.wait_for_status(CallStatus::Idle, budget).await?;
    report.note(format!(
        "record is {}",
        rig.record_from("alice")?.status
    ));

    report.collect(rig, &[&alice, &bob]);
    shutdown(&[&alice, &bob]).await?;
    Ok(report)
}

/// Carol calls Bob while Bob is already ringing for Alice
pub async fn busy(rig: &Rig) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("busy");
    let alice = rig.join("alice").await?;
    let bob = rig.join("bob").await?;
    let carol = rig.join("carol").await?;
    let budget = wait_budget(&rig.config);

    alice.engine.start_call(bob.party()).await?;
    bob.engine.wait_for_status(CallStatus::Ringing, budget).await?;
    report.note("bob ringing for alice");

    carol.engine.start_call(bob.party()).await?;
    carol.engine.wait_for_status(CallStatus::Idle, budget).await?;
    report.note(format!(
        "carol's call is {}, bob still {}",
        rig.record_from("carol")?.status,
        bob.engine.status()
    ));

    alice.engine.end_call().await?;
    bob.engine.wait_for_status(CallStatus::Idle, budget).await?;
    report.note("alice gave up");

    report.collect(rig, &[&alice, &bob, &carol]);
    shutdown(&[&alice, &bob, &carol]).await?;
    Ok(report)
}

/// Bob accepts but cannot get a media credential
pub async fn credential_failure(rig: &Rig) -> Result<ScenarioReport> {
    let mut report = ScenarioReport::new("credential-failure");
    let alice = rig.join("alice").await?;
    let bob = rig.join("bob").await?;
    let budget = wait_budget(&rig.config);

    bob.credentials.set_failure(Some(CredentialError::Network {
        reason: "token service unreachable".to_string(),
    }));

    alice.engine.start_call(bob.party()).await?;
    bob.engine.wait_for_status(CallStatus::Ringing, budget).await?;
    if let Err(e) = bob.engine.accept_call().await {
        report.note(format!("bob accept failed: {}", e));
    }
    let failed = bob.engine.snapshot();
    report.note(format!(
        "bob is {} ({}), record is {}",
        failed.status,
        failed.error.unwrap_or_default(),
        rig.record_from("alice")?.status
    ));

    bob.engine.end_call().await?;
    alice.engine.wait_for_status(CallStatus::Idle, budget).await?;
    report.note(format!(
        "bob reset, record is {}",
        rig.record_from("alice")?.status
    ));

    report.collect(rig, &[&alice, &bob]);
    shutdown(&[&alice, &bob]).await?;
    Ok(report)
}
