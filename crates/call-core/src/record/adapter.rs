//! Record feed adapter
//!
//! Typed pass-through from raw [`RecordChange`] notifications to
//! [`SignalingEvent`]s. Duplicates and out-of-order delivery are passed on
//! untouched; the session state machine decides what they mean.

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{CallRecord, RecordChange, RecordFeed, Subscription};

/// Signaling event derived from the record feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Someone inserted a record calling the local participant
    InboundRinging(CallRecord),
    /// A record changed
    RecordUpdated(CallRecord),
}

impl SignalingEvent {
    pub fn record(&self) -> &CallRecord {
        match self {
            SignalingEvent::InboundRinging(record) | SignalingEvent::RecordUpdated(record) => record,
        }
    }
}

impl From<RecordChange> for SignalingEvent {
    fn from(change: RecordChange) -> Self {
        match change {
            RecordChange::Inserted(record) => SignalingEvent::InboundRinging(record),
            RecordChange::Updated(record) => SignalingEvent::RecordUpdated(record),
        }
    }
}

/// Owns a record feed subscription and the task pumping it
pub struct RecordStoreAdapter {
    subscription: Subscription,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RecordStoreAdapter {
    /// Start forwarding the feed into `sink`
    ///
    /// The pump stops when the feed closes or when `sink` returns false.
    pub fn start<F>(feed: RecordFeed, sink: F) -> Self
    where
        F: Fn(SignalingEvent) -> bool + Send + 'static,
    {
        let RecordFeed {
            mut changes,
            subscription,
        } = feed;

        let pump = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let event = SignalingEvent::from(change);
                debug!("Record feed event for record {}", event.record().id);
                if !sink(event) {
                    debug!("Signaling sink closed, stopping record feed pump");
                    break;
                }
            }
        });

        Self {
            subscription,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Stop the pump and release the subscription. Idempotent.
    pub fn stop(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if self.subscription.unsubscribe() {
            info!("Record feed subscription released");
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_active()
    }
}

impl Drop for RecordStoreAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}
