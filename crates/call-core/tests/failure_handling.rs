//! Credential, media and store failures

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use common::{Harness, RING_TIMEOUT};
use homeops_call_core::config::DEFAULT_CONNECT_TIMEOUT_MS;
use homeops_call_core::memory::{HubGateway, InMemoryHistory, StaticCredentialIssuer};
use homeops_call_core::{
    CallEngine, CallEngineBuilder, CallError, CallOutcome, CallRecordStore, CallRole, CallStatus,
    ChannelKey, CredentialError, CredentialIssuer, GatewayEvent, JoinRequest, MediaCredential,
    MediaError, MediaGateway, RecordStatus, RecordUpdate, RemoteParty,
};

#[tokio::test(start_paused = true)]
async fn test_media_join_failure_moves_to_failed() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    let record = harness.ring(&alice, &bob).await;
    bob.gateway.set_join_failure(Some("no audio route"));

    let err = bob.engine.accept_call().await.unwrap_err();
    assert!(matches!(err, CallError::MediaJoinFailed { .. }));

    let snapshot = bob.engine.snapshot();
    assert_eq!(snapshot.status, CallStatus::Failed);
    assert!(snapshot.error.unwrap().contains("no audio route"));
    // No record mutation beyond the accept
    assert_eq!(harness.store.writes_to(&record.id), vec![RecordStatus::Connecting]);

    let diagnostics = bob.engine.diagnostics().await.unwrap();
    assert!(!diagnostics.timer_armed);
    assert!(!diagnostics.media_joined);

    bob.engine.end_call().await.unwrap();
    bob.assert_released().await;
    assert!(bob.engine.can_start_call());
}

#[tokio::test(start_paused = true)]
async fn test_caller_media_failure_while_dialing() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    alice.gateway.set_join_failure(Some("microphone unavailable"));
    let err = alice.engine.start_call(bob.party()).await.unwrap_err();
    assert!(err.is_session_failure());
    assert_eq!(alice.engine.status(), CallStatus::Failed);

    // The record is out there and bob rings until alice resets
    bob.wait_for(CallStatus::Ringing).await;
    alice.engine.end_call().await.unwrap();
    bob.wait_for(CallStatus::Idle).await;

    assert_eq!(harness.record_from("alice").status, RecordStatus::Ended);
    assert!(alice.history.is_empty());
    alice.assert_released().await;
    bob.assert_released().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_without_remote_presence() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    // Alice never makes it into the channel
    alice.gateway.set_join_failure(Some("offline"));
    let _ = alice.engine.start_call(bob.party()).await;
    bob.wait_for(CallStatus::Ringing).await;

    bob.engine.accept_call().await.unwrap();
    assert_eq!(bob.engine.status(), CallStatus::Connecting);
    assert!(bob.gateway.is_joined());

    tokio::time::sleep(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS - 100)).await;
    assert_eq!(bob.engine.status(), CallStatus::Connecting);

    bob.wait_for(CallStatus::Failed).await;
    let snapshot = bob.engine.snapshot();
    assert!(snapshot.error.unwrap().contains("Connect timeout"));
    assert!(!bob.gateway.is_joined());

    bob.engine.end_call().await.unwrap();
    bob.assert_released().await;
}

#[tokio::test(start_paused = true)]
async fn test_record_write_failure_does_not_block_local_state() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    let record = harness.ring(&alice, &bob).await;
    harness.store.set_writes_failing(true);

    bob.engine.reject_call().await.unwrap();
    assert_eq!(bob.engine.status(), CallStatus::Idle);
    bob.assert_released().await;

    // Unwritten record: classification falls back to duration
    assert_eq!(bob.history.entries()[0].outcome, CallOutcome::Missed);
    assert_eq!(harness.store.get(&record.id).unwrap().status, RecordStatus::Ringing);

    // Alice never heard about it and resolves through her own dial timeout
    harness.store.set_writes_failing(false);
    assert_eq!(alice.engine.status(), CallStatus::Dialing);
    alice.wait_for(CallStatus::Idle).await;
    assert_eq!(harness.store.get(&record.id).unwrap().status, RecordStatus::Missed);
    assert_eq!(alice.history.entries()[0].outcome, CallOutcome::Missed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_record_creation_keeps_idle() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    harness.store.set_writes_failing(true);
    let err = alice.engine.start_call(bob.party()).await.unwrap_err();
    assert!(matches!(err, CallError::RecordWriteFailed { .. }));
    assert!(alice.engine.can_start_call());
    assert_eq!(alice.gateway.join_count(), 0);
    alice.assert_released().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_still_returns_to_idle() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;
    let mut events = bob.engine.subscribe();

    harness.ring(&alice, &bob).await;
    bob.history.set_writes_failing(true);

    tokio::time::sleep(RING_TIMEOUT).await;
    bob.wait_for(CallStatus::Idle).await;
    bob.assert_released().await;
    assert!(bob.history.is_empty());

    let mut missed = false;
    while let Ok(notification) = events.try_recv() {
        if matches!(notification, homeops_call_core::CallNotification::Missed { .. }) {
            missed = true;
        }
    }
    assert!(missed);
}

#[tokio::test(start_paused = true)]
async fn test_symmetric_dial_timeout() {
    let harness = Harness::with_config(
        homeops_call_core::CallConfig::new().with_ring_timeout(Duration::from_secs(10)),
    );
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    let record = harness.ring(&alice, &bob).await;
    alice.wait_for(CallStatus::Idle).await;
    bob.wait_for(CallStatus::Idle).await;

    // Whichever timer wins, the record is resolved once
    assert_eq!(harness.store.writes_to(&record.id), vec![RecordStatus::Missed]);
    assert_eq!(alice.history.entries()[0].outcome, CallOutcome::Missed);
    assert_eq!(bob.history.entries()[0].outcome, CallOutcome::Missed);
    alice.assert_released().await;
    bob.assert_released().await;
}

/// Issuer that never answers
struct SilentIssuer;

#[async_trait]
impl CredentialIssuer for SilentIssuer {
    async fn issue(&self, _: &ChannelKey, _: CallRole) -> Result<MediaCredential, CredentialError> {
        std::future::pending().await
    }
}

/// Hub gateway whose `leave` never completes
struct StuckLeaveGateway(Arc<HubGateway>);

#[async_trait]
impl MediaGateway for StuckLeaveGateway {
    async fn join(
        &self,
        request: JoinRequest,
    ) -> Result<mpsc::UnboundedReceiver<GatewayEvent>, MediaError> {
        self.0.join(request).await
    }

    async fn leave(&self) -> Result<(), MediaError> {
        std::future::pending().await
    }

    async fn toggle_mute(&self) -> Result<bool, MediaError> {
        self.0.toggle_mute().await
    }
}

fn engine_for(
    harness: &Harness,
    id: &str,
    gateway: Arc<dyn MediaGateway>,
    issuer: Arc<dyn CredentialIssuer>,
    history: Arc<InMemoryHistory>,
) -> CallEngineBuilder {
    CallEngine::builder(id)
        .config(harness.config.clone())
        .record_store(harness.store.clone())
        .media_gateway(gateway)
        .credential_issuer(issuer)
        .history_sink(history)
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_credential_request_times_out() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob_gateway = HubGateway::new(harness.hub.clone(), "bob");
    let bob = engine_for(
        &harness,
        "bob",
        bob_gateway.clone(),
        Arc::new(SilentIssuer),
        InMemoryHistory::new(),
    )
    .build()
    .await
    .unwrap();

    alice
        .engine
        .start_call(RemoteParty::anonymous("bob"))
        .await
        .unwrap();
    bob.wait_for_status(CallStatus::Ringing, common::WAIT).await.unwrap();

    let accepted = tokio::time::timeout(Duration::from_secs(60), bob.accept_call())
        .await
        .expect("accept_call stayed blocked on the credential service");
    assert!(matches!(accepted, Err(CallError::ConnectTimeout { .. })));

    let snapshot = bob.snapshot();
    assert_eq!(snapshot.status, CallStatus::Failed);
    assert!(snapshot.error.unwrap().contains("Connect timeout"));
    assert_eq!(bob_gateway.join_count(), 0);

    let reset = tokio::time::timeout(Duration::from_secs(60), bob.end_call()).await;
    assert_eq!(reset.expect("end_call blocked"), Ok(()));
    assert_eq!(bob.status(), CallStatus::Idle);

    let diagnostics = bob.diagnostics().await.unwrap();
    assert!(!diagnostics.timer_armed);
    assert!(!diagnostics.media_joined);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_leave_does_not_block_hangup() {
    let harness = Harness::new();
    let alice_gateway = HubGateway::new(harness.hub.clone(), "alice");
    let alice_history = InMemoryHistory::new();
    let alice = engine_for(
        &harness,
        "alice",
        Arc::new(StuckLeaveGateway(alice_gateway.clone())),
        StaticCredentialIssuer::new(),
        alice_history.clone(),
    )
    .build()
    .await
    .unwrap();
    let bob = harness.client("bob").await;

    alice
        .start_call(RemoteParty::anonymous("bob"))
        .await
        .unwrap();
    bob.wait_for(CallStatus::Ringing).await;
    bob.engine.accept_call().await.unwrap();
    alice
        .wait_for_status(CallStatus::Connected, common::WAIT)
        .await
        .unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(60), alice.end_call()).await;
    assert_eq!(ended.expect("end_call blocked on leave"), Ok(()));
    assert_eq!(alice.status(), CallStatus::Idle);
    assert_eq!(alice_history.len(), 1);

    // The engine keeps serving commands afterwards
    assert!(alice.diagnostics().await.is_ok());
    assert!(alice.can_start_call());
}

#[tokio::test(start_paused = true)]
async fn test_accept_after_caller_cancelled_does_not_join() {
    let harness = Harness::new();
    let alice = harness.client("alice").await;
    let bob = harness.client("bob").await;

    let record = harness.ring(&alice, &bob).await;

    // The cancel is stored but bob has not seen the update yet
    harness
        .store
        .update(&record.id, RecordUpdate::terminal(RecordStatus::Ended))
        .await
        .unwrap();
    let err = bob.engine.accept_call().await.unwrap_err();
    assert_eq!(
        err,
        CallError::InvalidState {
            action: "accept_call",
            current: CallStatus::Idle
        }
    );

    assert_eq!(bob.engine.status(), CallStatus::Idle);
    assert_eq!(bob.gateway.join_count(), 0);
    assert!(!harness
        .store
        .writes_to(&record.id)
        .contains(&RecordStatus::Connecting));
    assert_eq!(bob.history.len(), 1);
    assert_eq!(bob.history.entries()[0].outcome, CallOutcome::Missed);
    bob.assert_released().await;
}
