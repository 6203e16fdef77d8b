//! Persisted local cache.
//!
//! A JSON snapshot of conversation metadata and ordered message lists,
//! written under the platform config dir. Streaming state has no
//! representation in the snapshot type, so it can never leak to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use formcoach_protocol::{Conversation, Message};

/// On-disk cache layout: conversations keyed by id, messages keyed by
/// conversation id as ordered arrays.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub conversations: HashMap<String, Conversation>,
    pub messages: HashMap<String, Vec<Message>>,
}

/// Default cache file location: `<config dir>/formcoach/cache.json`.
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("formcoach").join("cache.json"))
}

/// Load a snapshot. A missing or unreadable file yields an empty snapshot;
/// the cache is a convenience, never a startup blocker.
pub async fn load(path: &Path) -> CacheSnapshot {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(snapshot) => {
                debug!(path = %path.display(), "loaded conversation cache");
                snapshot
            }
            Err(e) => {
                warn!(path = %path.display(), "discarding corrupt conversation cache: {e}");
                CacheSnapshot::default()
            }
        },
        Err(_) => CacheSnapshot::default(),
    }
}

/// Write a snapshot, creating parent directories as needed.
pub async fn save(path: &Path, snapshot: &CacheSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use formcoach_protocol::{ConversationStatus, Sender};

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let mut snapshot = CacheSnapshot::default();
        snapshot.conversations.insert(
            "conv-1".to_string(),
            Conversation {
                id: "conv-1".to_string(),
                title: "Leg day · Aug 25".to_string(),
                kind: Default::default(),
                status: ConversationStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        snapshot.messages.insert(
            "conv-1".to_string(),
            vec![Message {
                id: "m-1".to_string(),
                conversation_id: "conv-1".to_string(),
                content: "hello".to_string(),
                sender: Sender::User,
                sequence: 1,
                created_at: Utc::now(),
            }],
        );

        save(&path, &snapshot).await.unwrap();
        let loaded = load(&path).await;
        assert_eq!(loaded.conversations.len(), 1);
        assert_eq!(loaded.messages["conv-1"][0].content, "hello");
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(load(&missing).await.conversations.is_empty());

        let corrupt = dir.path().join("bad.json");
        tokio::fs::write(&corrupt, b"{not json").await.unwrap();
        assert!(load(&corrupt).await.conversations.is_empty());
    }
}
