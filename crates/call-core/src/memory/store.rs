//! In-memory call record store

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::record::{CallRecord, CallRecordStore, RecordChange, RecordFeed, RecordStatus, RecordUpdate, Subscription};
use crate::types::{ChannelKey, RecordId};

struct Subscriber {
    id: u64,
    participant: String,
    changes: mpsc::UnboundedSender<RecordChange>,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

/// Record store backed by a concurrent map
///
/// Enforces the record invariants: one open record per channel key, and
/// terminal records never change. Every successful write is logged so tests
/// can count them.
pub struct InMemoryCallStore {
    records: DashMap<RecordId, CallRecord>,
    subscribers: Subscribers,
    next_subscriber: AtomicU64,
    writes: Mutex<Vec<(RecordId, RecordStatus)>>,
    fail_writes: AtomicBool,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(1),
            writes: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<CallRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Records created by `caller_id`
    pub fn records_from(&self, caller_id: &str) -> Vec<CallRecord> {
        self.records
            .iter()
            .filter(|r| r.caller_id == caller_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Statuses written to `id` by updates, in order
    pub fn writes_to(&self, id: &RecordId) -> Vec<RecordStatus> {
        self.writes
            .lock()
            .iter()
            .filter(|(record_id, _)| record_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Make creates and updates fail until turned off again
    pub fn set_writes_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Push a raw change to subscribers, bypassing the map
    ///
    /// Used to replay duplicates or deliver events out of order.
    pub fn deliver(&self, change: RecordChange) {
        broadcast(&self.subscribers, change);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }

    fn open_record_on(&self, channel_key: &ChannelKey) -> Option<RecordId> {
        self.records
            .iter()
            .find(|r| &r.channel_key == channel_key && !r.status.is_terminal())
            .map(|r| r.id.clone())
    }
}

impl Default for InMemoryCallStore {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast(subscribers: &Subscribers, change: RecordChange) {
    let subscribers = subscribers.lock();
    for subscriber in subscribers.iter() {
        let wanted = match &change {
            RecordChange::Inserted(record) => record.callee_id == subscriber.participant,
            RecordChange::Updated(_) => true,
        };
        if wanted && subscriber.changes.send(change.clone()).is_err() {
            trace!("Subscriber {} feed closed", subscriber.id);
        }
    }
}

#[async_trait]
impl CallRecordStore for InMemoryCallStore {
    async fn create(&self, record: CallRecord) -> Result<CallRecord, StoreError> {
        self.check_writable()?;
        if let Some(existing) = self.open_record_on(&record.channel_key) {
            debug!("Channel {} still has open record {}", record.channel_key, existing);
            return Err(StoreError::ChannelBusy {
                channel_key: record.channel_key.to_string(),
            });
        }

        self.records.insert(record.id.clone(), record.clone());
        debug!("Inserted call record {} ({} -> {})", record.id, record.caller_id, record.callee_id);
        broadcast(&self.subscribers, RecordChange::Inserted(record.clone()));
        Ok(record)
    }

    async fn update(&self, id: &RecordId, update: RecordUpdate) -> Result<CallRecord, StoreError> {
        self.check_writable()?;
        let updated = {
            let mut entry = self.records.get_mut(id).ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
            })?;
            let record = entry.value_mut();
            if record.status.is_terminal() {
                return Err(StoreError::TerminalRecord {
                    id: id.to_string(),
                    status: record.status,
                });
            }
            record.status = update.status;
            if update.answered_at.is_some() {
                record.answered_at = update.answered_at;
            }
            if update.ended_at.is_some() {
                record.ended_at = update.ended_at;
            }
            record.clone()
        };

        self.writes.lock().push((id.clone(), updated.status));
        debug!("Updated call record {} -> {}", id, updated.status);
        broadcast(&self.subscribers, RecordChange::Updated(updated.clone()));
        Ok(updated)
    }

    async fn subscribe(&self, participant: &str) -> Result<RecordFeed, StoreError> {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber {
            id,
            participant: participant.to_string(),
            changes: tx,
        });
        debug!("Subscriber {} watching records for {}", id, participant);

        let subscribers = self.subscribers.clone();
        Ok(RecordFeed {
            changes: rx,
            subscription: Subscription::new(move || {
                subscribers.lock().retain(|s| s.id != id);
            }),
        })
    }
}
