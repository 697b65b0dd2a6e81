//! In-process backends for the external collaborators
//!
//! Several engines can share one [`InMemoryCallStore`] and one
//! [`MediaHub`] to talk to each other without a network. The simulator and
//! the integration tests are built on these.

mod media;
mod store;

pub use media::{HubGateway, MediaHub, StaticCredentialIssuer};
pub use store::InMemoryCallStore;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::directory::PartyDirectory;
use crate::error::HistoryError;
use crate::history::{CallHistoryEntry, CallHistorySink};

/// History sink keeping entries in a vector
#[derive(Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<CallHistoryEntry>>,
    fail_writes: AtomicBool,
}

impl InMemoryHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<CallHistoryEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn set_writes_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CallHistorySink for InMemoryHistory {
    async fn append(&self, entry: CallHistoryEntry) -> Result<(), HistoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HistoryError::WriteFailed {
                reason: "writes disabled".to_string(),
            });
        }
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// Directory with a fixed set of display names
#[derive(Default)]
pub struct StaticDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entries<I, K, V>(entries: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let names = entries
            .into_iter()
            .map(|(id, name)| (id.into(), name.into()))
            .collect();
        Arc::new(Self {
            names: RwLock::new(names),
        })
    }

    pub fn insert(&self, participant_id: impl Into<String>, display_name: impl Into<String>) {
        self.names
            .write()
            .insert(participant_id.into(), display_name.into());
    }
}

#[async_trait]
impl PartyDirectory for StaticDirectory {
    async fn display_name(&self, participant_id: &str) -> Option<String> {
        self.names.read().get(participant_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::CallOutcome;
    use chrono::Utc;

    fn entry() -> CallHistoryEntry {
        CallHistoryEntry {
            caller_id: "alice".to_string(),
            callee_id: "bob".to_string(),
            outcome: CallOutcome::Completed,
            duration_seconds: 3,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_history_append_and_failure() {
        let history = InMemoryHistory::new();
        history.append(entry()).await.unwrap();
        assert_eq!(history.len(), 1);

        history.set_writes_failing(true);
        assert!(history.append(entry()).await.is_err());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let directory = StaticDirectory::with_entries([("w-17", "Sam Field")]);
        assert_eq!(directory.display_name("w-17").await.as_deref(), Some("Sam Field"));
        assert_eq!(directory.display_name("w-18").await, None);

        directory.insert("w-18", "Ana Route");
        assert_eq!(directory.display_name("w-18").await.as_deref(), Some("Ana Route"));
    }
}
