//! Media transport gateway binding
//!
//! The audio transport SDK is an external collaborator with a fixed
//! contract ([`MediaGateway`]). Join credentials come from a separate
//! issuance service ([`CredentialIssuer`]).
//!
//! The gateway connection is scoped to one call: [`MediaBinding::acquire`]
//! issues a credential, joins the channel and returns a [`MediaLease`];
//! releasing the lease leaves the channel. Nothing about the connection
//! outlives the lease.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CallError, CallResult, CredentialError, MediaError};
use crate::types::{CallRole, ChannelKey, ParticipantId};

/// Presence callbacks raised by the gateway while joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The peer joined and its audio is flowing
    RemoteAudioPublished,
    /// The peer left the channel
    RemoteUserLeft,
}

/// Short-lived credential for joining one media channel
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCredential {
    pub token: String,
    /// Numeric participant id assigned by the issuer
    pub participant_id: u32,
}

impl fmt::Debug for MediaCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCredential")
            .field("token", &"<redacted>")
            .field("participant_id", &self.participant_id)
            .finish()
    }
}

/// Everything the gateway needs to join a channel
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub channel_key: ChannelKey,
    pub credential: MediaCredential,
    pub local_id: ParticipantId,
}

/// Credential issuance service
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(
        &self,
        channel_key: &ChannelKey,
        role: CallRole,
    ) -> Result<MediaCredential, CredentialError>;
}

/// Audio transport SDK contract
#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Join a channel. Presence callbacks for this join arrive on the
    /// returned receiver until `leave`.
    async fn join(
        &self,
        request: JoinRequest,
    ) -> Result<mpsc::UnboundedReceiver<GatewayEvent>, MediaError>;

    async fn leave(&self) -> Result<(), MediaError>;

    /// Flip the local mute state and return the new value
    async fn toggle_mute(&self) -> Result<bool, MediaError>;
}

/// Binds the engine to a gateway and a credential issuer
#[derive(Clone)]
pub struct MediaBinding {
    gateway: Arc<dyn MediaGateway>,
    credentials: Arc<dyn CredentialIssuer>,
}

impl MediaBinding {
    pub fn new(gateway: Arc<dyn MediaGateway>, credentials: Arc<dyn CredentialIssuer>) -> Self {
        Self {
            gateway,
            credentials,
        }
    }

    /// Issue a credential and join `channel_key`
    ///
    /// Presence callbacks are forwarded into `sink` until the lease is
    /// released or `sink` returns false.
    pub async fn acquire<F>(
        &self,
        channel_key: &ChannelKey,
        role: CallRole,
        local_id: &str,
        sink: F,
    ) -> CallResult<MediaLease>
    where
        F: Fn(GatewayEvent) -> bool + Send + 'static,
    {
        let credential = self
            .credentials
            .issue(channel_key, role)
            .await
            .map_err(CallError::from)?;
        debug!(
            "Issued media credential for {} (participant {})",
            channel_key, credential.participant_id
        );

        let mut events = self
            .gateway
            .join(JoinRequest {
                channel_key: channel_key.clone(),
                credential,
                local_id: local_id.to_string(),
            })
            .await
            .map_err(CallError::from)?;
        info!("Joined media channel {} as {}", channel_key, role);

        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !sink(event) {
                    break;
                }
            }
        });

        Ok(MediaLease {
            gateway: self.gateway.clone(),
            channel_key: channel_key.clone(),
            listener: Some(listener),
        })
    }
}

/// A joined media channel, held for the lifetime of one call
pub struct MediaLease {
    gateway: Arc<dyn MediaGateway>,
    channel_key: ChannelKey,
    listener: Option<JoinHandle<()>>,
}

impl MediaLease {
    pub fn channel_key(&self) -> &ChannelKey {
        &self.channel_key
    }

    pub async fn toggle_mute(&self) -> CallResult<bool> {
        self.gateway
            .toggle_mute()
            .await
            .map_err(|e| CallError::MediaError {
                details: e.to_string(),
            })
    }

    /// Stop listening and leave the channel
    pub async fn release(mut self) -> CallResult<()> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        let result = self.gateway.leave().await;
        info!("Left media channel {}", self.channel_key);
        result.map_err(|e| CallError::MediaError {
            details: e.to_string(),
        })
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        // Only reached when the lease was never released
        let Some(listener) = self.listener.take() else {
            return;
        };
        listener.abort();
        warn!("Media lease for {} dropped without release, leaving", self.channel_key);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let gateway = self.gateway.clone();
            runtime.spawn(async move {
                if let Err(e) = gateway.leave().await {
                    warn!("Leave after dropped lease failed: {}", e);
                }
            });
        }
    }
}
