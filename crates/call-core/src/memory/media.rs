//! Loopback media hub and credential issuer
//!
//! Every [`HubGateway`] attached to the same [`MediaHub`] sees the others:
//! joining a channel announces the joiner to the members already there and
//! them to the joiner, leaving tells the remaining members.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CredentialError, MediaError};
use crate::media::{CredentialIssuer, GatewayEvent, JoinRequest, MediaCredential, MediaGateway};
use crate::types::{CallRole, ChannelKey, ParticipantId};

struct Member {
    gateway_id: u64,
    participant: ParticipantId,
    events: mpsc::UnboundedSender<GatewayEvent>,
}

/// Shared switchboard for in-process gateways
#[derive(Default)]
pub struct MediaHub {
    channels: Mutex<HashMap<ChannelKey, Vec<Member>>>,
    next_gateway: AtomicU64,
}

impl MediaHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Participants currently joined to `channel_key`
    pub fn members(&self, channel_key: &ChannelKey) -> Vec<ParticipantId> {
        self.channels
            .lock()
            .get(channel_key)
            .map(|members| members.iter().map(|m| m.participant.clone()).collect())
            .unwrap_or_default()
    }

    fn join(&self, channel_key: &ChannelKey, member: Member) {
        let mut channels = self.channels.lock();
        let members = channels.entry(channel_key.clone()).or_default();
        for peer in members.iter() {
            let _ = peer.events.send(GatewayEvent::RemoteAudioPublished);
            let _ = member.events.send(GatewayEvent::RemoteAudioPublished);
        }
        members.push(member);
    }

    fn leave(&self, channel_key: &ChannelKey, gateway_id: u64) {
        let mut channels = self.channels.lock();
        let Some(members) = channels.get_mut(channel_key) else {
            return;
        };
        members.retain(|m| m.gateway_id != gateway_id);
        for peer in members.iter() {
            let _ = peer.events.send(GatewayEvent::RemoteUserLeft);
        }
        if members.is_empty() {
            channels.remove(channel_key);
        }
    }
}

#[derive(Default)]
struct GatewayState {
    channel: Option<ChannelKey>,
    muted: bool,
}

/// Gateway for one participant, attached to a [`MediaHub`]
pub struct HubGateway {
    id: u64,
    participant: ParticipantId,
    hub: Arc<MediaHub>,
    state: Mutex<GatewayState>,
    join_failure: Mutex<Option<String>>,
    joins: AtomicUsize,
    leaves: AtomicUsize,
}

impl HubGateway {
    pub fn new(hub: Arc<MediaHub>, participant: impl Into<ParticipantId>) -> Arc<Self> {
        let id = hub.next_gateway.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            participant: participant.into(),
            hub,
            state: Mutex::new(GatewayState::default()),
            join_failure: Mutex::new(None),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
        })
    }

    /// Make joins fail with `reason`, or succeed again with `None`
    pub fn set_join_failure(&self, reason: Option<&str>) {
        *self.join_failure.lock() = reason.map(str::to_string);
    }

    pub fn is_joined(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    /// Number of `leave` calls, including ones with nothing to leave
    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaGateway for HubGateway {
    async fn join(
        &self,
        request: JoinRequest,
    ) -> Result<mpsc::UnboundedReceiver<GatewayEvent>, MediaError> {
        if let Some(reason) = self.join_failure.lock().clone() {
            return Err(MediaError::JoinRejected { reason });
        }

        let previous = {
            let mut state = self.state.lock();
            let previous = state.channel.replace(request.channel_key.clone());
            state.muted = false;
            previous
        };
        if let Some(previous) = previous {
            debug!("{} switching from {} without leave", self.participant, previous);
            self.hub.leave(&previous, self.id);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.join(
            &request.channel_key,
            Member {
                gateway_id: self.id,
                participant: request.local_id.clone(),
                events: tx,
            },
        );
        self.joins.fetch_add(1, Ordering::SeqCst);
        debug!(
            "{} joined {} as participant {}",
            request.local_id, request.channel_key, request.credential.participant_id
        );
        Ok(rx)
    }

    async fn leave(&self) -> Result<(), MediaError> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        let channel = self.state.lock().channel.take();
        if let Some(channel) = channel {
            self.hub.leave(&channel, self.id);
            debug!("{} left {}", self.participant, channel);
        }
        Ok(())
    }

    async fn toggle_mute(&self) -> Result<bool, MediaError> {
        let mut state = self.state.lock();
        if state.channel.is_none() {
            return Err(MediaError::NotJoined);
        }
        state.muted = !state.muted;
        Ok(state.muted)
    }
}

/// Credential issuer that hands out opaque tokens
#[derive(Default)]
pub struct StaticCredentialIssuer {
    failure: Mutex<Option<CredentialError>>,
    next_participant: AtomicU32,
}

impl StaticCredentialIssuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make issuance fail with `error`, or succeed again with `None`
    pub fn set_failure(&self, error: Option<CredentialError>) {
        *self.failure.lock() = error;
    }

    pub fn issued_count(&self) -> u32 {
        self.next_participant.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for StaticCredentialIssuer {
    async fn issue(
        &self,
        channel_key: &ChannelKey,
        role: CallRole,
    ) -> Result<MediaCredential, CredentialError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let participant_id = self.next_participant.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaCredential {
            token: format!("tok-{}-{}-{}", channel_key, role, participant_id),
            participant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: &ChannelKey, local_id: &str) -> JoinRequest {
        JoinRequest {
            channel_key: channel.clone(),
            credential: MediaCredential {
                token: "t".to_string(),
                participant_id: 1,
            },
            local_id: local_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_peers_see_each_other() {
        let hub = MediaHub::new();
        let alice = HubGateway::new(hub.clone(), "alice");
        let bob = HubGateway::new(hub.clone(), "bob");
        let channel = ChannelKey::generate("alice", "bob");

        let mut alice_events = alice.join(request(&channel, "alice")).await.unwrap();
        assert!(alice_events.try_recv().is_err());

        let mut bob_events = bob.join(request(&channel, "bob")).await.unwrap();
        assert_eq!(alice_events.try_recv().unwrap(), GatewayEvent::RemoteAudioPublished);
        assert_eq!(bob_events.try_recv().unwrap(), GatewayEvent::RemoteAudioPublished);
        assert_eq!(hub.members(&channel).len(), 2);

        bob.leave().await.unwrap();
        assert_eq!(alice_events.try_recv().unwrap(), GatewayEvent::RemoteUserLeft);
        assert_eq!(hub.members(&channel), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_join_failure_and_mute() {
        let hub = MediaHub::new();
        let gateway = HubGateway::new(hub, "alice");
        let channel = ChannelKey::generate("alice", "bob");

        assert_eq!(gateway.toggle_mute().await, Err(MediaError::NotJoined));

        gateway.set_join_failure(Some("no route"));
        assert!(gateway.join(request(&channel, "alice")).await.is_err());
        assert_eq!(gateway.join_count(), 0);

        gateway.set_join_failure(None);
        let _events = gateway.join(request(&channel, "alice")).await.unwrap();
        assert_eq!(gateway.toggle_mute().await, Ok(true));
        assert_eq!(gateway.toggle_mute().await, Ok(false));

        gateway.leave().await.unwrap();
        gateway.leave().await.unwrap();
        assert_eq!(gateway.leave_count(), 2);
        assert!(!gateway.is_joined());
    }

    #[tokio::test]
    async fn test_issuer_failure_toggle() {
        let issuer = StaticCredentialIssuer::new();
        let channel = ChannelKey::generate("alice", "bob");

        let credential = issuer.issue(&channel, CallRole::Caller).await.unwrap();
        assert_eq!(credential.participant_id, 1);

        issuer.set_failure(Some(CredentialError::Network {
            reason: "offline".to_string(),
        }));
        assert!(issuer.issue(&channel, CallRole::Callee).await.is_err());
        assert_eq!(issuer.issued_count(), 1);
    }
}
