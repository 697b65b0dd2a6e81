//! Display-name lookup for remote parties

use async_trait::async_trait;

use crate::types::RemoteParty;

/// Resolves participant ids to display names (user profiles live elsewhere)
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    async fn display_name(&self, participant_id: &str) -> Option<String>;
}

/// Directory that knows nobody; remote parties show up by id
pub struct NoDirectory;

#[async_trait]
impl PartyDirectory for NoDirectory {
    async fn display_name(&self, _participant_id: &str) -> Option<String> {
        None
    }
}

pub(crate) async fn resolve_party(directory: &dyn PartyDirectory, participant_id: &str) -> RemoteParty {
    match directory.display_name(participant_id).await {
        Some(name) => RemoteParty::new(participant_id, name),
        None => RemoteParty::anonymous(participant_id),
    }
}
