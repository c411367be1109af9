// Moderation mirror - core logic for the audit trail of deleted messages and
// member departures. Persistence and the monitor-channel notice are two
// independent best-effort side effects; nothing here couples them.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::moderation_models::{DeletedMessageRecord, MemberLeaveRecord, TrackedMessage};

// Cap on the in-memory message snapshots so the cache doesn't grow unbounded.
const MAX_TRACKED_MESSAGES: usize = 5_000;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Persistence for the append-only audit tables.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_deleted_message(
        &self,
        record: &DeletedMessageRecord,
    ) -> Result<(), AuditError>;

    /// Most recent deletions for a guild, newest first.
    async fn recent_deleted_messages(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<DeletedMessageRecord>, AuditError>;

    async fn record_member_leave(&self, record: &MemberLeaveRecord) -> Result<(), AuditError>;

    /// Most recent departures for a guild, newest first.
    async fn recent_member_leaves(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<MemberLeaveRecord>, AuditError>;

    async fn count_deleted_messages(&self, guild_id: u64) -> Result<u64, AuditError>;

    async fn count_member_leaves(&self, guild_id: u64) -> Result<u64, AuditError>;
}

pub struct AuditService<S: AuditStore> {
    store: S,
    /// Message ID -> snapshot, so delete events can recover author/content.
    message_cache: DashMap<u64, TrackedMessage>,
}

impl<S: AuditStore> AuditService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            message_cache: DashMap::new(),
        }
    }

    /// Store a message snapshot so a later delete can be logged reliably.
    pub fn remember_message(&self, message: TrackedMessage) {
        self.message_cache.insert(message.message_id, message);

        // Simple eviction: drop an arbitrary entry once we cross the cap.
        if self.message_cache.len() > MAX_TRACKED_MESSAGES {
            if let Some(first_key) = self.message_cache.iter().next().map(|entry| *entry.key()) {
                self.message_cache.remove(&first_key);
            }
        }
    }

    /// Remove and return the snapshot for a deleted message.
    pub fn take_tracked_message(&self, message_id: u64) -> Option<TrackedMessage> {
        self.message_cache.remove(&message_id).map(|(_, msg)| msg)
    }

    /// A deletion is always persisted; the channel notice is suppressed when
    /// there was no text content to show.
    pub fn should_notify_deletion(&self, record: &DeletedMessageRecord) -> bool {
        !record.content.is_empty()
    }

    pub async fn record_deleted_message(
        &self,
        record: &DeletedMessageRecord,
    ) -> Result<(), AuditError> {
        self.store.record_deleted_message(record).await
    }

    pub async fn recent_deleted_messages(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<DeletedMessageRecord>, AuditError> {
        self.store.recent_deleted_messages(guild_id, limit).await
    }

    pub async fn record_member_leave(&self, record: &MemberLeaveRecord) -> Result<(), AuditError> {
        self.store.record_member_leave(record).await
    }

    pub async fn recent_member_leaves(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<MemberLeaveRecord>, AuditError> {
        self.store.recent_member_leaves(guild_id, limit).await
    }

    pub async fn count_deleted_messages(&self, guild_id: u64) -> Result<u64, AuditError> {
        self.store.count_deleted_messages(guild_id).await
    }

    pub async fn count_member_leaves(&self, guild_id: u64) -> Result<u64, AuditError> {
        self.store.count_member_leaves(guild_id).await
    }
}
