//! Call engine handle and builder

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::machine::{
    post, Command, EngineDiagnostics, Input, MachineDeps, Reply, SessionMachine,
};
use crate::config::{millis, CallConfig};
use crate::directory::{NoDirectory, PartyDirectory};
use crate::error::{CallError, CallResult};
use crate::events::{spawn_event_handler, CallEventHandler, CallNotification};
use crate::history::{CallHistorySink, Finalizer};
use crate::media::{CredentialIssuer, MediaBinding, MediaGateway};
use crate::record::{CallRecordStore, RecordStoreAdapter};
use crate::types::{CallSnapshot, CallStatus, ParticipantId, RemoteParty};

/// Handle to a running call engine
///
/// Cheap to clone. All clones drive the same session task; the task ends
/// when [`CallEngine::shutdown`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    local_id: ParticipantId,
    inbox: mpsc::UnboundedSender<Input>,
    state: watch::Receiver<CallSnapshot>,
    notifications: broadcast::Sender<CallNotification>,
    task: Mutex<Option<JoinHandle<()>>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(handler) = self.handler_task.lock().take() {
            handler.abort();
        }
    }
}

impl CallEngine {
    pub fn builder(local_id: impl Into<ParticipantId>) -> CallEngineBuilder {
        CallEngineBuilder::new(local_id)
    }

    /// Participant id this engine signals as
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    /// Place a call to `target`
    ///
    /// Fails with [`CallError::SessionActive`] unless idle. On success the
    /// session is dialing and the media join has been attempted.
    pub async fn start_call(&self, target: RemoteParty) -> CallResult<()> {
        self.request(|reply| Command::StartCall { target, reply }).await
    }

    /// Answer the ringing call
    pub async fn accept_call(&self) -> CallResult<()> {
        self.request(Command::AcceptCall).await
    }

    /// Decline the ringing call
    pub async fn reject_call(&self) -> CallResult<()> {
        self.request(Command::RejectCall).await
    }

    /// Hang up, cancel, decline or reset, depending on the current state
    ///
    /// A no-op when idle.
    pub async fn end_call(&self) -> CallResult<()> {
        self.request(Command::EndCall).await
    }

    /// Flip local mute. Returns the new mute state.
    pub async fn toggle_mute(&self) -> CallResult<bool> {
        self.request(Command::ToggleMute).await
    }

    /// The latest published session snapshot
    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> CallStatus {
        self.inner.state.borrow().status
    }

    /// Whether a new call may be started right now
    pub fn can_start_call(&self) -> bool {
        self.status().is_idle()
    }

    /// Observe snapshots as they are published
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.state.clone()
    }

    /// Receive notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CallNotification> {
        self.inner.notifications.subscribe()
    }

    /// Ask the engine task which resources it currently holds
    ///
    /// Unlike [`CallEngine::snapshot`] this waits for every input queued
    /// before it to be processed.
    pub async fn diagnostics(&self) -> CallResult<EngineDiagnostics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .inbox
            .send(Input::Command(Command::Diagnostics(reply_tx)))
            .map_err(|_| CallError::EngineStopped)?;
        reply_rx.await.map_err(|_| CallError::EngineStopped)
    }

    /// Wait until the session reaches `status`
    pub async fn wait_for_status(&self, status: CallStatus, timeout: Duration) -> CallResult<CallSnapshot> {
        let mut state = self.watch();
        let waited = tokio::time::timeout(timeout, state.wait_for(|s| s.status == status)).await;
        match waited {
            Ok(Ok(snapshot)) => Ok(snapshot.clone()),
            Ok(Err(_)) => Err(CallError::EngineStopped),
            Err(_) => Err(CallError::WaitTimeout {
                status,
                duration_ms: millis(timeout),
            }),
        }
    }

    /// End any active session and stop the engine task
    ///
    /// Calling it again, or from another clone, is a no-op.
    pub async fn shutdown(&self) -> CallResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.inbox.send(Input::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Call engine task ended abnormally: {}", e);
            }
            info!("Call engine for {} stopped", self.inner.local_id);
        }
        Ok(())
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> CallResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .inbox
            .send(Input::Command(command(reply_tx)))
            .map_err(|_| CallError::EngineStopped)?;
        reply_rx.await.map_err(|_| CallError::EngineStopped)?
    }
}

/// Builder for [`CallEngine`]
pub struct CallEngineBuilder {
    local_id: ParticipantId,
    config: CallConfig,
    store: Option<Arc<dyn CallRecordStore>>,
    gateway: Option<Arc<dyn MediaGateway>>,
    credentials: Option<Arc<dyn CredentialIssuer>>,
    history: Option<Arc<dyn CallHistorySink>>,
    directory: Arc<dyn PartyDirectory>,
    event_handler: Option<Arc<dyn CallEventHandler>>,
}

impl CallEngineBuilder {
    pub fn new(local_id: impl Into<ParticipantId>) -> Self {
        Self {
            local_id: local_id.into(),
            config: CallConfig::default(),
            store: None,
            gateway: None,
            credentials: None,
            history: None,
            directory: Arc::new(NoDirectory),
            event_handler: None,
        }
    }

    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_store(mut self, store: Arc<dyn CallRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn media_gateway(mut self, gateway: Arc<dyn MediaGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn credential_issuer(mut self, credentials: Arc<dyn CredentialIssuer>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn history_sink(mut self, history: Arc<dyn CallHistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn PartyDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn CallEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Subscribe to the record store and start the engine task
    pub async fn build(self) -> CallResult<CallEngine> {
        if self.local_id.is_empty() {
            return Err(CallError::invalid_config("local_id", "must not be empty"));
        }
        self.config.validate()?;

        let store = self.store.ok_or_else(|| CallError::invalid_config("record_store", "required"))?;
        let gateway = self
            .gateway
            .ok_or_else(|| CallError::invalid_config("media_gateway", "required"))?;
        let credentials = self
            .credentials
            .ok_or_else(|| CallError::invalid_config("credential_issuer", "required"))?;
        let history = self
            .history
            .ok_or_else(|| CallError::invalid_config("history_sink", "required"))?;

        let feed = store
            .subscribe(&self.local_id)
            .await
            .map_err(|e| CallError::SubscriptionFailed {
                reason: e.to_string(),
            })?;

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CallSnapshot::idle());
        let (notify_tx, _) = broadcast::channel(self.config.notification_capacity);

        let weak_inbox = inbox_tx.downgrade();
        let sink_inbox = weak_inbox.clone();
        let adapter = RecordStoreAdapter::start(feed, move |event| {
            post(&sink_inbox, Input::Signal(event))
        });

        let handler_task = self
            .event_handler
            .map(|handler| spawn_event_handler(notify_tx.subscribe(), handler));

        let mut machine = SessionMachine::new(MachineDeps {
            local_id: self.local_id.clone(),
            config: self.config,
            store,
            media: MediaBinding::new(gateway, credentials),
            finalizer: Finalizer::new(history),
            directory: self.directory,
            inbox: weak_inbox,
            state_tx,
            notify_tx: notify_tx.clone(),
        });

        let local_id = self.local_id.clone();
        let task = tokio::spawn(async move {
            debug!("Call engine task for {} started", local_id);
            let mut stopped = false;
            while let Some(input) = inbox_rx.recv().await {
                if !machine.handle(input).await {
                    stopped = true;
                    break;
                }
            }
            if !stopped {
                // Every handle was dropped without a shutdown
                machine.shutdown().await;
            }
            adapter.stop();
            debug!("Call engine task for {} exiting ({})", local_id, machine.status());
        });

        info!("Call engine ready for {}", self.local_id);
        Ok(CallEngine {
            inner: Arc::new(EngineInner {
                local_id: self.local_id,
                inbox: inbox_tx,
                state: state_rx,
                notifications: notify_tx,
                task: Mutex::new(Some(task)),
                handler_task: Mutex::new(handler_task),
            }),
        })
    }
}
