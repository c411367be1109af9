// Ticket lifecycle - support tickets stored as one shared JSON document in a
// remote blob store, mutated via whole-document read-modify-write.
//
// Lost-update protection: the document embeds a monotonically increasing
// revision counter. Every write goes through `TicketStore::store` with the
// revision the caller read, and the store refuses to overwrite a document
// that moved. Within this process an async mutex additionally serializes
// writers, so conflicts can only come from another deployment.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketKind {
    Bug,
    Feature,
    General,
    Urgent,
}

impl TicketKind {
    pub fn label(&self) -> &'static str {
        match self {
            TicketKind::Bug => "bug",
            TicketKind::Feature => "feature",
            TicketKind::General => "general",
            TicketKind::Urgent => "urgent",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TicketKind::Bug => "🐛",
            TicketKind::Feature => "💡",
            TicketKind::General => "❓",
            TicketKind::Urgent => "⚠️",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bug" => Some(TicketKind::Bug),
            "feature" => Some(TicketKind::Feature),
            "general" => Some(TicketKind::General),
            "urgent" => Some(TicketKind::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub user_id: u64,
    pub username: String,
    pub channel_id: u64,
    pub kind: TicketKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: TicketStatus,
    pub guild_id: u64,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<u64>,
}

/// The whole shared document. Records are never physically removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDocument {
    #[serde(default)]
    pub tickets: Vec<TicketRecord>,
    pub last_updated: DateTime<Utc>,
    /// Monotonic write counter; the conditional-store revision tag.
    #[serde(default)]
    pub revision: u64,
}

impl TicketDocument {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            tickets: Vec::new(),
            last_updated: now,
            revision: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketStats {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
    pub by_kind: HashMap<TicketKind, usize>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Input for opening a ticket; the adapter allocates the channel first.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub user_id: u64,
    pub username: String,
    pub guild_id: u64,
    pub channel_id: u64,
    pub kind: TicketKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("User already has {open} open tickets (limit {max})")]
    TooManyOpen { open: usize, max: usize },

    #[error("No ticket found for this channel")]
    NotFound,

    #[error("Ticket is already closed")]
    AlreadyClosed,

    #[error("Only the ticket creator or an operator may close it")]
    NotPermitted,

    #[error("The ticket list changed while writing; please retry")]
    RevisionConflict,

    #[error("Remote store error: {0}")]
    Remote(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Whole-document storage for the shared ticket list.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fetch the current document. A missing or empty backing file yields the
    /// empty document at revision 0.
    async fn load(&self) -> Result<TicketDocument, TicketError>;

    /// Conditional overwrite: `doc.revision` must be `expected_revision + 1`,
    /// and the write fails with `RevisionConflict` when the remote document
    /// is no longer at `expected_revision`.
    async fn store(&self, doc: &TicketDocument, expected_revision: u64)
        -> Result<(), TicketError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct TicketService<S: TicketStore> {
    store: S,
    max_open_per_user: usize,
    /// Serializes this process's read-modify-write cycles on the document.
    write_lock: Mutex<()>,
}

impl<S: TicketStore> TicketService<S> {
    pub fn new(store: S, max_open_per_user: usize) -> Self {
        Self {
            store,
            max_open_per_user,
            write_lock: Mutex::new(()),
        }
    }

    /// Six-digit ticket id derived from the creation time.
    pub fn ticket_id_from(now: DateTime<Utc>) -> String {
        format!("{:06}", now.timestamp_millis().unsigned_abs() % 1_000_000)
    }

    fn open_count(doc: &TicketDocument, user_id: u64) -> usize {
        doc.tickets
            .iter()
            .filter(|t| t.user_id == user_id && t.status == TicketStatus::Open)
            .count()
    }

    /// Pre-flight check used before the adapter allocates a channel, so a
    /// rejected open creates neither a channel nor a list mutation.
    pub async fn can_open(&self, user_id: u64) -> Result<(), TicketError> {
        let doc = self.store.load().await?;
        let open = Self::open_count(&doc, user_id);
        if open >= self.max_open_per_user {
            return Err(TicketError::TooManyOpen {
                open,
                max: self.max_open_per_user,
            });
        }
        Ok(())
    }

    /// Append a new open ticket to the shared list.
    ///
    /// The per-user cap is re-checked under the write lock; the conditional
    /// store gets one reload-and-reapply retry before a conflict surfaces.
    pub async fn open_ticket(&self, new: NewTicket) -> Result<TicketRecord, TicketError> {
        let _guard = self.write_lock.lock().await;

        let record = TicketRecord {
            ticket_id: Self::ticket_id_from(new.created_at),
            user_id: new.user_id,
            username: new.username,
            channel_id: new.channel_id,
            kind: new.kind,
            description: new.description,
            created_at: new.created_at,
            status: TicketStatus::Open,
            guild_id: new.guild_id,
            closed_at: None,
            closed_by: None,
        };

        for attempt in 0..2 {
            let mut doc = self.store.load().await?;

            let open = Self::open_count(&doc, record.user_id);
            if open >= self.max_open_per_user {
                return Err(TicketError::TooManyOpen {
                    open,
                    max: self.max_open_per_user,
                });
            }

            let expected = doc.revision;
            doc.tickets.push(record.clone());
            doc.revision = expected + 1;
            doc.last_updated = new.created_at;

            match self.store.store(&doc, expected).await {
                Ok(()) => return Ok(record),
                Err(TicketError::RevisionConflict) if attempt == 0 => {
                    tracing::warn!(
                        ticket_id = %record.ticket_id,
                        "Ticket list moved underneath us; reloading and retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(TicketError::RevisionConflict)
    }

    /// Transition the ticket backing `channel_id` from open to closed.
    ///
    /// Permitted only for the original creator or an operator. Closing is
    /// one-way; re-closing is rejected.
    pub async fn close_ticket(
        &self,
        channel_id: u64,
        closer_id: u64,
        is_operator: bool,
        now: DateTime<Utc>,
    ) -> Result<TicketRecord, TicketError> {
        let _guard = self.write_lock.lock().await;

        for attempt in 0..2 {
            let mut doc = self.store.load().await?;

            let ticket = doc
                .tickets
                .iter_mut()
                .find(|t| t.channel_id == channel_id)
                .ok_or(TicketError::NotFound)?;

            if ticket.status == TicketStatus::Closed {
                return Err(TicketError::AlreadyClosed);
            }
            if ticket.user_id != closer_id && !is_operator {
                return Err(TicketError::NotPermitted);
            }

            ticket.status = TicketStatus::Closed;
            ticket.closed_at = Some(now);
            ticket.closed_by = Some(closer_id);
            let closed = ticket.clone();

            let expected = doc.revision;
            doc.revision = expected + 1;
            doc.last_updated = now;

            match self.store.store(&doc, expected).await {
                Ok(()) => return Ok(closed),
                Err(TicketError::RevisionConflict) if attempt == 0 => {
                    tracing::warn!(
                        channel_id,
                        "Ticket list moved underneath us; reloading and retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(TicketError::RevisionConflict)
    }

    /// Aggregates for the stats and connectivity-test commands.
    pub async fn stats(&self) -> Result<TicketStats, TicketError> {
        let doc = self.store.load().await?;

        let mut stats = TicketStats {
            total: doc.tickets.len(),
            last_updated: Some(doc.last_updated),
            ..Default::default()
        };
        for ticket in &doc.tickets {
            match ticket.status {
                TicketStatus::Open => stats.open += 1,
                TicketStatus::Closed => stats.closed += 1,
            }
            *stats.by_kind.entry(ticket.kind).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// In-memory whole-document store with real conditional-write semantics.
    struct MockTicketStore {
        doc: std::sync::Mutex<TicketDocument>,
        /// Fail the first N conditional writes with a conflict.
        conflicts_to_inject: AtomicUsize,
    }

    impl MockTicketStore {
        fn new() -> Self {
            Self {
                doc: std::sync::Mutex::new(TicketDocument::empty(t(0))),
                conflicts_to_inject: AtomicUsize::new(0),
            }
        }

        fn inject_conflicts(&self, n: usize) {
            self.conflicts_to_inject.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TicketStore for MockTicketStore {
        async fn load(&self) -> Result<TicketDocument, TicketError> {
            Ok(self.doc.lock().unwrap().clone())
        }

        async fn store(
            &self,
            doc: &TicketDocument,
            expected_revision: u64,
        ) -> Result<(), TicketError> {
            if self
                .conflicts_to_inject
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TicketError::RevisionConflict);
            }

            let mut current = self.doc.lock().unwrap();
            if current.revision != expected_revision {
                return Err(TicketError::RevisionConflict);
            }
            *current = doc.clone();
            Ok(())
        }
    }

    fn new_ticket(user_id: u64, channel_id: u64, secs: i64) -> NewTicket {
        NewTicket {
            user_id,
            username: "alice".into(),
            guild_id: 10,
            channel_id,
            kind: TicketKind::Bug,
            description: "Something broke".into(),
            created_at: t(secs),
        }
    }

    #[tokio::test]
    async fn opening_appends_an_open_record() {
        let service = TicketService::new(MockTicketStore::new(), 3);

        let record = service.open_ticket(new_ticket(1, 100, 1)).await.unwrap();
        assert_eq!(record.status, TicketStatus::Open);
        assert_eq!(record.ticket_id.len(), 6);

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.by_kind.get(&TicketKind::Bug), Some(&1));
    }

    #[tokio::test]
    async fn fourth_open_ticket_is_rejected_without_mutation() {
        let service = TicketService::new(MockTicketStore::new(), 3);

        for i in 0..3 {
            service
                .open_ticket(new_ticket(1, 100 + i, i as i64))
                .await
                .unwrap();
        }

        assert!(matches!(
            service.can_open(1).await,
            Err(TicketError::TooManyOpen { open: 3, max: 3 })
        ));
        let result = service.open_ticket(new_ticket(1, 200, 5)).await;
        assert!(matches!(result, Err(TicketError::TooManyOpen { .. })));

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total, 3);

        // A different user is unaffected by the first user's cap.
        assert!(service.can_open(2).await.is_ok());
    }

    #[tokio::test]
    async fn closing_a_ticket_frees_a_slot() {
        let service = TicketService::new(MockTicketStore::new(), 3);

        for i in 0..3 {
            service
                .open_ticket(new_ticket(1, 100 + i, i as i64))
                .await
                .unwrap();
        }
        service.close_ticket(100, 1, false, t(50)).await.unwrap();

        assert!(service.can_open(1).await.is_ok());
        service.open_ticket(new_ticket(1, 300, 60)).await.unwrap();
    }

    #[tokio::test]
    async fn close_sets_status_closer_and_time() {
        let service = TicketService::new(MockTicketStore::new(), 3);
        service.open_ticket(new_ticket(1, 100, 1)).await.unwrap();

        let closed = service.close_ticket(100, 1, false, t(99)).await.unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(closed.closed_by, Some(1));
        assert_eq!(closed.closed_at, Some(t(99)));

        // The record stays in the list; nothing is physically removed.
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test]
    async fn reclosing_is_rejected() {
        let service = TicketService::new(MockTicketStore::new(), 3);
        service.open_ticket(new_ticket(1, 100, 1)).await.unwrap();
        service.close_ticket(100, 1, false, t(50)).await.unwrap();

        let result = service.close_ticket(100, 1, false, t(60)).await;
        assert!(matches!(result, Err(TicketError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn only_creator_or_operator_may_close() {
        let service = TicketService::new(MockTicketStore::new(), 3);
        service.open_ticket(new_ticket(1, 100, 1)).await.unwrap();

        let stranger = service.close_ticket(100, 99, false, t(50)).await;
        assert!(matches!(stranger, Err(TicketError::NotPermitted)));

        let operator = service.close_ticket(100, 99, true, t(50)).await.unwrap();
        assert_eq!(operator.closed_by, Some(99));
    }

    #[tokio::test]
    async fn closing_an_unknown_channel_is_not_found() {
        let service = TicketService::new(MockTicketStore::new(), 3);
        let result = service.close_ticket(12345, 1, true, t(0)).await;
        assert!(matches!(result, Err(TicketError::NotFound)));
    }

    #[tokio::test]
    async fn a_single_revision_conflict_is_retried() {
        let store = MockTicketStore::new();
        store.inject_conflicts(1);
        let service = TicketService::new(store, 3);

        let record = service.open_ticket(new_ticket(1, 100, 1)).await.unwrap();
        assert_eq!(record.channel_id, 100);
        assert_eq!(service.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn persistent_conflicts_surface_to_the_caller() {
        let store = MockTicketStore::new();
        store.inject_conflicts(5);
        let service = TicketService::new(store, 3);

        let result = service.open_ticket(new_ticket(1, 100, 1)).await;
        assert!(matches!(result, Err(TicketError::RevisionConflict)));
    }

    #[test]
    fn ticket_ids_are_six_digits() {
        let id = TicketService::<MockTicketStore>::ticket_id_from(t(123));
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn kind_parsing_accepts_the_four_variants_only() {
        assert_eq!(TicketKind::parse("bug"), Some(TicketKind::Bug));
        assert_eq!(TicketKind::parse(" Feature "), Some(TicketKind::Feature));
        assert_eq!(TicketKind::parse("GENERAL"), Some(TicketKind::General));
        assert_eq!(TicketKind::parse("urgent"), Some(TicketKind::Urgent));
        assert_eq!(TicketKind::parse("spam"), None);
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = TicketDocument::empty(t(0));
        doc.tickets.push(TicketRecord {
            ticket_id: "123456".into(),
            user_id: 1,
            username: "alice".into(),
            channel_id: 100,
            kind: TicketKind::Urgent,
            description: "help".into(),
            created_at: t(1),
            status: TicketStatus::Open,
            guild_id: 10,
            closed_at: None,
            closed_by: None,
        });
        doc.revision = 7;

        let json = serde_json::to_string_pretty(&doc).unwrap();
        assert!(json.contains("\"urgent\""));
        assert!(json.contains("\"open\""));

        let parsed: TicketDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.revision, 7);
        assert_eq!(parsed.tickets.len(), 1);
        assert_eq!(parsed.tickets[0].kind, TicketKind::Urgent);
    }
}
