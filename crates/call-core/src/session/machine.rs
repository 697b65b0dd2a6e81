//! Call session state machine
//!
//! Owned by the engine task. Every input (commands, record feed events,
//! gateway presence callbacks, timer expiries, duration ticks) is processed
//! to completion before the next one is taken, so transitions never
//! interleave.
//!
//! Each session gets a fresh epoch. Timer, tick and gateway inputs carry the
//! epoch they were created under; anything from an older epoch refers to a
//! session that is already gone and is dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::CallConfig;
use crate::directory::{resolve_party, PartyDirectory};
use crate::error::{CallError, CallResult, StoreError};
use crate::events::{CallNotification, StateChange};
use crate::history::{Finalizer, FinishedCall};
use crate::media::{GatewayEvent, MediaBinding, MediaLease};
use crate::record::{CallRecord, CallRecordStore, RecordStatus, RecordUpdate, SignalingEvent};
use crate::ticker::DurationTicker;
use crate::timeout::{TimeoutSupervisor, TimerHandle};
use crate::types::{
    CallRole, CallSnapshot, CallStatus, ChannelKey, ParticipantId, RecordId, RemoteParty,
};

/// Finished or busy-rejected record ids remembered for duplicate filtering
const RECENT_RECORD_CAPACITY: usize = 64;

pub(crate) type Reply<T> = oneshot::Sender<CallResult<T>>;

/// Actions requested through the engine handle
pub(crate) enum Command {
    StartCall { target: RemoteParty, reply: Reply<()> },
    AcceptCall(Reply<()>),
    RejectCall(Reply<()>),
    EndCall(Reply<()>),
    ToggleMute(Reply<bool>),
    Diagnostics(oneshot::Sender<EngineDiagnostics>),
}

/// Resources the machine holds at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDiagnostics {
    pub status: CallStatus,
    /// A ring, dial or connect timer is pending
    pub timer_armed: bool,
    /// The session holds a media lease
    pub media_joined: bool,
    pub ticker_running: bool,
}

/// Everything the engine task consumes
pub(crate) enum Input {
    Command(Command),
    Signal(SignalingEvent),
    Media { epoch: u64, event: GatewayEvent },
    TimerExpired { epoch: u64, handle: TimerHandle },
    Tick { epoch: u64 },
    Shutdown(oneshot::Sender<()>),
}

/// Post into the engine inbox if it is still open
pub(crate) fn post(inbox: &mpsc::WeakUnboundedSender<Input>, input: Input) -> bool {
    match inbox.upgrade() {
        Some(tx) => tx.send(input).is_ok(),
        None => false,
    }
}

/// Collaborators and channels handed to the machine by the engine
pub(crate) struct MachineDeps {
    pub local_id: ParticipantId,
    pub config: CallConfig,
    pub store: Arc<dyn CallRecordStore>,
    pub media: MediaBinding,
    pub finalizer: Finalizer,
    pub directory: Arc<dyn PartyDirectory>,
    pub inbox: mpsc::WeakUnboundedSender<Input>,
    pub state_tx: watch::Sender<CallSnapshot>,
    pub notify_tx: broadcast::Sender<CallNotification>,
}

struct ActiveSession {
    epoch: u64,
    status: CallStatus,
    role: CallRole,
    record_id: RecordId,
    channel_key: ChannelKey,
    caller_id: ParticipantId,
    callee_id: ParticipantId,
    remote_party: RemoteParty,
    is_muted: bool,
    duration_seconds: u64,
    error: Option<String>,
    /// The gateway reported the peer's audio
    remote_present: bool,
    media: Option<MediaLease>,
    ticker: Option<DurationTicker>,
}

impl ActiveSession {
    fn new(role: CallRole, status: CallStatus, record: &CallRecord, remote_party: RemoteParty) -> Self {
        Self {
            epoch: 0,
            status,
            role,
            record_id: record.id.clone(),
            channel_key: record.channel_key.clone(),
            caller_id: record.caller_id.clone(),
            callee_id: record.callee_id.clone(),
            remote_party,
            is_muted: false,
            duration_seconds: 0,
            error: None,
            remote_present: false,
            media: None,
            ticker: None,
        }
    }
}

/// Bounded set of record ids, oldest evicted first
struct RecentRecords {
    order: VecDeque<RecordId>,
    ids: HashSet<RecordId>,
    capacity: usize,
}

impl RecentRecords {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if the id was already present
    fn insert(&mut self, id: RecordId) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn contains(&self, id: &RecordId) -> bool {
        self.ids.contains(id)
    }
}

fn status_of(session: &Option<ActiveSession>) -> CallStatus {
    session.as_ref().map_or(CallStatus::Idle, |s| s.status)
}

pub(crate) struct SessionMachine {
    local_id: ParticipantId,
    config: CallConfig,
    store: Arc<dyn CallRecordStore>,
    media: MediaBinding,
    finalizer: Finalizer,
    directory: Arc<dyn PartyDirectory>,
    timers: TimeoutSupervisor,
    session: Option<ActiveSession>,
    next_epoch: u64,
    recent: RecentRecords,
    inbox: mpsc::WeakUnboundedSender<Input>,
    state_tx: watch::Sender<CallSnapshot>,
    notify_tx: broadcast::Sender<CallNotification>,
}

impl SessionMachine {
    pub(crate) fn new(deps: MachineDeps) -> Self {
        Self {
            local_id: deps.local_id,
            config: deps.config,
            store: deps.store,
            media: deps.media,
            finalizer: deps.finalizer,
            directory: deps.directory,
            timers: TimeoutSupervisor::new(),
            session: None,
            next_epoch: 0,
            recent: RecentRecords::new(RECENT_RECORD_CAPACITY),
            inbox: deps.inbox,
            state_tx: deps.state_tx,
            notify_tx: deps.notify_tx,
        }
    }

    /// Process one input. Returns false once the machine has shut down.
    pub(crate) async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Command(command) => self.handle_command(command).await,
            Input::Signal(SignalingEvent::InboundRinging(record)) => {
                self.on_inbound_ringing(record).await
            }
            Input::Signal(SignalingEvent::RecordUpdated(record)) => {
                self.on_record_updated(record).await
            }
            Input::Media { epoch, event } => self.on_media_event(epoch, event).await,
            Input::TimerExpired { epoch, handle } => self.on_timer_expired(epoch, handle).await,
            Input::Tick { epoch } => self.on_tick(epoch),
            Input::Shutdown(done) => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    /// End whatever session is active
    pub(crate) async fn shutdown(&mut self) {
        if self.session.is_some() {
            info!("Shutting down with an active session, ending it");
            if let Err(e) = self.end_call().await {
                warn!("Ending session during shutdown failed: {}", e);
            }
        }
        self.timers.disarm_all();
    }

    pub(crate) fn status(&self) -> CallStatus {
        status_of(&self.session)
    }

    fn diagnostics(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            status: self.status(),
            timer_armed: self.timers.is_armed(),
            media_joined: self.session.as_ref().map_or(false, |s| s.media.is_some()),
            ticker_running: self
                .session
                .as_ref()
                .and_then(|s| s.ticker.as_ref())
                .map_or(false, DurationTicker::is_running),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall { target, reply } => {
                let result = self.start_call(target).await;
                let _ = reply.send(result);
            }
            Command::AcceptCall(reply) => {
                let result = self.accept_call().await;
                let _ = reply.send(result);
            }
            Command::RejectCall(reply) => {
                let result = self.reject_call().await;
                let _ = reply.send(result);
            }
            Command::EndCall(reply) => {
                let result = self.end_call().await;
                let _ = reply.send(result);
            }
            Command::ToggleMute(reply) => {
                let result = self.toggle_mute().await;
                let _ = reply.send(result);
            }
            Command::Diagnostics(reply) => {
                let _ = reply.send(self.diagnostics());
            }
        }
    }

    // Local actions

    async fn start_call(&mut self, target: RemoteParty) -> CallResult<()> {
        if let Some(session) = &self.session {
            debug!("start_call ignored, session {} is {}", session.record_id, session.status);
            return Err(CallError::SessionActive {
                status: session.status,
            });
        }
        if target.id.is_empty() {
            return Err(CallError::InvalidTarget {
                reason: "empty participant id".to_string(),
            });
        }
        if target.id == self.local_id {
            return Err(CallError::InvalidTarget {
                reason: "cannot call yourself".to_string(),
            });
        }

        let channel_key = ChannelKey::generate(&self.local_id, &target.id);
        let record = CallRecord::ringing(self.local_id.clone(), target.id.clone(), channel_key);
        let created = tokio::time::timeout(self.config.connect_timeout(), self.store.create(record))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable {
                    reason: format!("no answer within {}ms", self.config.connect_timeout_ms),
                })
            });
        let record = created.map_err(|e| {
            error!("Failed to create call record for {}: {}", target.id, e);
            CallError::from(e)
        })?;
        info!(
            "Dialing {} (record {}, channel {})",
            target.id, record.id, record.channel_key
        );

        let epoch = self.begin_session(ActiveSession::new(
            CallRole::Caller,
            CallStatus::Dialing,
            &record,
            target,
        ));
        self.arm_timer(epoch, self.config.dial_timeout());
        self.announce(CallStatus::Idle);

        self.join_media().await
    }

    async fn accept_call(&mut self) -> CallResult<()> {
        let (record_id, epoch) = match &self.session {
            Some(s) if s.status == CallStatus::Ringing => (s.record_id.clone(), s.epoch),
            other => return Err(CallError::invalid_state("accept_call", status_of(other))),
        };
        info!("Accepting call {}", record_id);

        self.timers.disarm_all();
        let written = self
            .write_record(&record_id, RecordUpdate::status(RecordStatus::Connecting))
            .await;
        if let Some(status) = written.filter(RecordStatus::is_terminal) {
            // The caller gave up before our accept landed
            info!("Call {} already {}, not joining", record_id, status);
            self.finish(Some(status)).await;
            return Err(CallError::invalid_state("accept_call", CallStatus::Idle));
        }
        self.transition(CallStatus::Connecting);
        self.arm_timer(epoch, self.config.connect_timeout());

        self.join_media().await
    }

    async fn reject_call(&mut self) -> CallResult<()> {
        let record_id = match &self.session {
            Some(s) if s.status == CallStatus::Ringing => s.record_id.clone(),
            other => return Err(CallError::invalid_state("reject_call", status_of(other))),
        };
        info!("Rejecting call {}", record_id);

        self.timers.disarm_all();
        let terminal = self
            .write_record(&record_id, RecordUpdate::terminal(RecordStatus::Rejected))
            .await;
        self.finish(terminal).await;
        Ok(())
    }

    async fn end_call(&mut self) -> CallResult<()> {
        let (status, record_id) = match &self.session {
            Some(s) => (s.status, s.record_id.clone()),
            None => {
                debug!("end_call with no active session");
                return Ok(());
            }
        };

        match status {
            CallStatus::Ringing => self.reject_call().await,
            CallStatus::Failed => {
                // Reset only, no history. The record is closed so the other
                // side stops waiting on it.
                info!("Resetting failed call {}", record_id);
                self.write_record(&record_id, RecordUpdate::terminal(RecordStatus::Ended))
                    .await;
                self.finish(None).await;
                Ok(())
            }
            CallStatus::Dialing | CallStatus::Connecting | CallStatus::Connected => {
                info!("Ending call {} while {}", record_id, status);
                self.timers.disarm_all();
                let terminal = self
                    .write_record(&record_id, RecordUpdate::terminal(RecordStatus::Ended))
                    .await;
                self.finish(terminal).await;
                Ok(())
            }
            CallStatus::Idle => Ok(()),
        }
    }

    async fn toggle_mute(&mut self) -> CallResult<bool> {
        let lease = match &self.session {
            Some(ActiveSession {
                media: Some(lease), ..
            }) => lease,
            other => return Err(CallError::invalid_state("toggle_mute", status_of(other))),
        };

        let is_muted = lease.toggle_mute().await?;
        if let Some(session) = self.session.as_mut() {
            session.is_muted = is_muted;
        }
        debug!("Local audio {}", if is_muted { "muted" } else { "unmuted" });
        self.publish();
        self.notify(CallNotification::MuteChanged { is_muted });
        Ok(is_muted)
    }

    // Record feed

    async fn on_inbound_ringing(&mut self, record: CallRecord) {
        if record.callee_id != self.local_id {
            debug!("Ignoring record {} addressed to {}", record.id, record.callee_id);
            return;
        }
        if record.status != RecordStatus::Ringing {
            debug!("Ignoring inbound record {} in status {}", record.id, record.status);
            return;
        }
        if self.recent.contains(&record.id) {
            debug!("Ignoring inbound record {} already handled", record.id);
            return;
        }

        if let Some(session) = &self.session {
            if session.record_id == record.id {
                debug!("Duplicate ringing for current call {}", record.id);
                return;
            }
            let status = session.status;
            self.reject_busy(record, status).await;
            return;
        }

        let remote_party = resolve_party(self.directory.as_ref(), &record.caller_id).await;
        info!(
            "Incoming call from {} (record {}, channel {})",
            record.caller_id, record.id, record.channel_key
        );
        let epoch = self.begin_session(ActiveSession::new(
            CallRole::Callee,
            CallStatus::Ringing,
            &record,
            remote_party,
        ));
        self.arm_timer(epoch, self.config.ring_timeout());
        self.announce(CallStatus::Idle);
    }

    async fn reject_busy(&mut self, record: CallRecord, status: CallStatus) {
        if !self.recent.insert(record.id.clone()) {
            return;
        }
        warn!(
            "Busy ({}), rejecting incoming call {} from {}",
            status, record.id, record.caller_id
        );
        self.write_record(&record.id, RecordUpdate::terminal(RecordStatus::Rejected))
            .await;
    }

    async fn on_record_updated(&mut self, record: CallRecord) {
        let status = match &self.session {
            Some(s) if s.record_id == record.id => s.status,
            _ => {
                debug!("Ignoring update for record {} ({})", record.id, record.status);
                return;
            }
        };

        if record.status.is_terminal() {
            info!("Call record {} is now {}", record.id, record.status);
            self.finish(Some(record.status)).await;
            return;
        }

        match (status, record.status) {
            (CallStatus::Dialing, RecordStatus::Connecting | RecordStatus::Connected) => {
                self.remote_accepted().await
            }
            _ => debug!(
                "No transition for record {} ({}) while {}",
                record.id, record.status, status
            ),
        }
    }

    // Gateway

    async fn on_media_event(&mut self, epoch: u64, event: GatewayEvent) {
        let status = match self.session.as_mut() {
            Some(s) if s.epoch == epoch => {
                s.remote_present = event == GatewayEvent::RemoteAudioPublished;
                s.status
            }
            _ => {
                debug!("Ignoring {:?} from a finished session", event);
                return;
            }
        };

        match (event, status) {
            (GatewayEvent::RemoteAudioPublished, CallStatus::Dialing) => {
                self.remote_accepted().await
            }
            (GatewayEvent::RemoteAudioPublished, CallStatus::Connecting) => {
                self.try_connect().await
            }
            (
                GatewayEvent::RemoteUserLeft,
                CallStatus::Dialing | CallStatus::Connecting | CallStatus::Connected,
            ) => {
                info!("Remote party left the media channel");
                if let Err(e) = self.end_call().await {
                    warn!("Ending call after remote left failed: {}", e);
                }
            }
            _ => debug!("Gateway event {:?} has no effect while {}", event, status),
        }
    }

    // Timers

    async fn on_timer_expired(&mut self, epoch: u64, handle: TimerHandle) {
        let (status, record_id) = match &self.session {
            Some(s) if s.epoch == epoch => (s.status, s.record_id.clone()),
            _ => {
                debug!("Ignoring timer {} from a finished session", handle.id());
                return;
            }
        };
        if !self.timers.claim_expiry(handle) {
            debug!("Ignoring superseded timer {}", handle.id());
            return;
        }

        match status {
            CallStatus::Ringing | CallStatus::Dialing => {
                info!("Call {} unanswered while {}, marking missed", record_id, status);
                let terminal = self
                    .write_record(&record_id, RecordUpdate::terminal(RecordStatus::Missed))
                    .await;
                self.finish(terminal).await;
            }
            CallStatus::Connecting => {
                let err = CallError::ConnectTimeout {
                    duration_ms: self.config.connect_timeout_ms,
                };
                self.enter_failed(err.to_string()).await;
            }
            _ => debug!("Timer {} expired with nothing to do while {}", handle.id(), status),
        }
    }

    fn on_tick(&mut self, epoch: u64) {
        let duration_seconds = match self.session.as_mut() {
            Some(s) if s.epoch == epoch && s.status == CallStatus::Connected => {
                s.duration_seconds += 1;
                s.duration_seconds
            }
            _ => return,
        };
        self.publish();
        self.notify(CallNotification::DurationTick { duration_seconds });
    }

    // Transitions

    fn begin_session(&mut self, mut session: ActiveSession) -> u64 {
        self.next_epoch += 1;
        session.epoch = self.next_epoch;
        let epoch = session.epoch;
        self.session = Some(session);
        epoch
    }

    /// Caller side: the callee accepted (record or gateway said so)
    async fn remote_accepted(&mut self) {
        let epoch = match &self.session {
            Some(s) if s.status == CallStatus::Dialing => s.epoch,
            _ => return,
        };
        self.timers.disarm_all();
        self.transition(CallStatus::Connecting);
        self.arm_timer(epoch, self.config.connect_timeout());
        self.try_connect().await;
    }

    /// Enter `connected` once joined and the peer's audio is present
    async fn try_connect(&mut self) {
        let ready = match &self.session {
            Some(s) => s.status == CallStatus::Connecting && s.media.is_some() && s.remote_present,
            None => false,
        };
        if !ready {
            return;
        }

        self.timers.disarm_all();
        let period = self.config.tick_interval();
        let inbox = self.inbox.clone();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let epoch = session.epoch;
        session.duration_seconds = 0;
        session.ticker = Some(DurationTicker::start(period, move || {
            post(&inbox, Input::Tick { epoch })
        }));
        let role = session.role;
        let record_id = session.record_id.clone();

        self.transition(CallStatus::Connected);
        if role == CallRole::Caller {
            self.write_record(&record_id, RecordUpdate::answered()).await;
        }
    }

    async fn join_media(&mut self) -> CallResult<()> {
        let (epoch, channel_key, role) = match &self.session {
            Some(s) => (s.epoch, s.channel_key.clone(), s.role),
            None => return Ok(()),
        };

        let inbox = self.inbox.clone();
        let sink = move |event| post(&inbox, Input::Media { epoch, event });
        let limit = self.config.connect_timeout();
        let acquired = tokio::time::timeout(
            limit,
            self.media.acquire(&channel_key, role, &self.local_id, sink),
        )
        .await
        .unwrap_or(Err(CallError::ConnectTimeout {
            duration_ms: self.config.connect_timeout_ms,
        }));
        match acquired {
            Ok(lease) => {
                if let Some(session) = self.session.as_mut() {
                    session.media = Some(lease);
                }
                self.try_connect().await;
                Ok(())
            }
            Err(e) => {
                self.enter_failed(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn enter_failed(&mut self, message: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        error!("Call {} failed: {}", session.record_id, message);
        let previous = session.status;
        session.status = CallStatus::Failed;
        session.error = Some(message.clone());
        let ticker = session.ticker.take();
        let lease = session.media.take();
        let session_id = Some(session.record_id.clone());

        self.timers.disarm_all();
        drop(ticker);
        if let Some(lease) = lease {
            self.release_media(lease).await;
        }

        self.announce(previous);
        self.notify(CallNotification::Failed {
            session_id,
            message,
        });
    }

    /// Tear the session down and return to idle
    ///
    /// Taking the session out of `self` first makes this the only place a
    /// session ends; a second terminal event finds nothing to finish.
    async fn finish(&mut self, terminal_status: Option<RecordStatus>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.timers.disarm_all();
        if let Some(mut ticker) = session.ticker.take() {
            ticker.stop();
        }
        if let Some(lease) = session.media.take() {
            self.release_media(lease).await;
        }
        self.recent.insert(session.record_id.clone());

        let outcome = if session.status == CallStatus::Failed {
            None
        } else {
            let entry = self
                .finalizer
                .finalize(FinishedCall {
                    caller_id: session.caller_id.clone(),
                    callee_id: session.callee_id.clone(),
                    terminal_status,
                    duration_seconds: session.duration_seconds,
                })
                .await;
            Some(entry)
        };

        info!("Call {} finished, back to idle", session.record_id);
        self.state_tx.send_replace(CallSnapshot::idle());
        self.notify(CallNotification::StateChanged(StateChange {
            previous: session.status,
            current: CallStatus::Idle,
            session_id: Some(session.record_id.clone()),
            role: Some(session.role),
            remote_party: Some(session.remote_party),
            timestamp: Utc::now(),
        }));
        if let Some(entry) = outcome {
            self.notify(CallNotification::for_outcome(
                session.record_id,
                entry.outcome,
                entry.duration_seconds,
            ));
        }
    }

    fn transition(&mut self, status: CallStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let previous = session.status;
        session.status = status;
        if previous != status {
            self.announce(previous);
        }
    }

    /// Leave the media channel without letting a stuck gateway hold the
    /// engine past the connect timeout
    async fn release_media(&self, lease: MediaLease) {
        match tokio::time::timeout(self.config.connect_timeout(), lease.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Leaving media channel failed: {}", e),
            Err(_) => warn!(
                "Leaving media channel gave no answer within {}ms, abandoning it",
                self.config.connect_timeout_ms
            ),
        }
    }

    fn arm_timer(&mut self, epoch: u64, duration: Duration) {
        let inbox = self.inbox.clone();
        self.timers.arm(duration, move |handle| {
            post(&inbox, Input::TimerExpired { epoch, handle });
        });
    }

    /// Best-effort record write; returns the status the record ended up in
    async fn write_record(&self, id: &RecordId, update: RecordUpdate) -> Option<RecordStatus> {
        let status = update.status;
        let written = tokio::time::timeout(self.config.connect_timeout(), self.store.update(id, update))
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Unavailable {
                    reason: format!("no answer within {}ms", self.config.connect_timeout_ms),
                })
            });
        match written {
            Ok(record) => {
                debug!("Call record {} -> {}", id, record.status);
                Some(record.status)
            }
            Err(StoreError::TerminalRecord { status: existing, .. }) => {
                debug!("Call record {} already {}, {} not written", id, existing, status);
                Some(existing)
            }
            Err(e) => {
                warn!("Call record {} write ({}) failed: {}", id, status, e);
                None
            }
        }
    }

    // Presentation

    fn snapshot(&self) -> CallSnapshot {
        let Some(s) = &self.session else {
            return CallSnapshot::idle();
        };
        CallSnapshot {
            status: s.status,
            session_id: Some(s.record_id.clone()),
            channel_key: Some(s.channel_key.clone()),
            role: Some(s.role),
            remote_party: Some(s.remote_party.clone()),
            is_muted: s.is_muted,
            duration_seconds: if s.status == CallStatus::Connected {
                s.duration_seconds
            } else {
                0
            },
            error: if s.status == CallStatus::Failed {
                s.error.clone()
            } else {
                None
            },
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    fn announce(&self, previous: CallStatus) {
        let snapshot = self.snapshot();
        debug!("Call state {} -> {}", previous, snapshot.status);
        let change = StateChange {
            previous,
            current: snapshot.status,
            session_id: snapshot.session_id.clone(),
            role: snapshot.role,
            remote_party: snapshot.remote_party.clone(),
            timestamp: Utc::now(),
        };
        self.state_tx.send_replace(snapshot);
        self.notify(CallNotification::StateChanged(change));
    }

    fn notify(&self, notification: CallNotification) {
        // No subscribers is fine
        let _ = self.notify_tx.send(notification);
    }
}
