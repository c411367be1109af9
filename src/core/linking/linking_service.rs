// Account linking - exchanges a one-time code for a permanent mapping between
// a Discord user and an external account, backed by a remote transactional
// document store with a local mirror row for fast lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("This Discord account is already linked")]
    AlreadyLinked,

    #[error("Unknown or already used link code")]
    InvalidToken,

    #[error("The link code was consumed by a concurrent request")]
    TokenConflict,

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// An unused one-time link token as read from the remote store.
///
/// `update_time` is the revision tag of the token document at read time; the
/// consume transaction is predicated on it so two concurrent consumers cannot
/// both succeed.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct LinkToken {
    /// Full remote document name/path of the token.
    pub doc_name: String,
    pub token: String,
    /// External account the token belongs to.
    pub account_id: String,
    pub update_time: String,
}

/// A completed link, mirrored locally after the remote transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub discord_id: u64,
    pub account_id: String,
    pub guild_id: u64,
    pub linked_at: DateTime<Utc>,
}

/// Remote transactional store for tokens and link documents.
#[async_trait]
pub trait LinkTokenStore: Send + Sync {
    /// Look up an unused token document by its code value.
    async fn find_unused_token(&self, token: &str) -> Result<Option<LinkToken>, LinkError>;

    /// Fetch the link document for a Discord id, if one exists.
    async fn get_link(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError>;

    /// Atomically: mark the token consumed (recording consumer and time),
    /// create the link document, and append the account id to the reward
    /// mailbox list. All-or-nothing; fails with `TokenConflict` when the
    /// token document changed since it was read, and with `AlreadyLinked`
    /// when a link document for this Discord id already exists.
    async fn consume_token(&self, token: &LinkToken, record: &LinkRecord)
        -> Result<(), LinkError>;
}

/// Local mirror of committed links.
#[async_trait]
pub trait LinkMirrorStore: Send + Sync {
    async fn get(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError>;
    async fn save(&self, record: &LinkRecord) -> Result<(), LinkError>;
}

pub struct LinkService<R: LinkTokenStore, M: LinkMirrorStore> {
    remote: R,
    mirror: M,
}

impl<R: LinkTokenStore, M: LinkMirrorStore> LinkService<R, M> {
    pub fn new(remote: R, mirror: M) -> Self {
        Self { remote, mirror }
    }

    /// Attempt to link `discord_id` to the account owning `token`.
    ///
    /// State changes happen only inside the remote transaction: a failure
    /// before it leaves nothing changed, and the transaction itself is
    /// all-or-nothing. The local mirror write afterwards is best-effort (the
    /// remote store is authoritative; the mirror backfills on the next
    /// status check).
    pub async fn link_account(
        &self,
        discord_id: u64,
        guild_id: u64,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<LinkRecord, LinkError> {
        if self.mirror.get(discord_id).await?.is_some() {
            return Err(LinkError::AlreadyLinked);
        }
        if self.remote.get_link(discord_id).await?.is_some() {
            return Err(LinkError::AlreadyLinked);
        }

        let token = self
            .remote
            .find_unused_token(token.trim())
            .await?
            .ok_or(LinkError::InvalidToken)?;

        let record = LinkRecord {
            discord_id,
            account_id: token.account_id.clone(),
            guild_id,
            linked_at: now,
        };

        self.remote.consume_token(&token, &record).await?;

        if let Err(e) = self.mirror.save(&record).await {
            tracing::warn!(
                discord_id,
                "Link committed remotely but local mirror write failed: {}",
                e
            );
        }

        Ok(record)
    }

    /// Read-only status check. Prefers the mirror, falls back to the remote
    /// store and backfills the mirror on a hit.
    pub async fn link_status(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError> {
        if let Some(record) = self.mirror.get(discord_id).await? {
            return Ok(Some(record));
        }

        match self.remote.get_link(discord_id).await? {
            Some(record) => {
                if let Err(e) = self.mirror.save(&record).await {
                    tracing::warn!(discord_id, "Failed to backfill link mirror: {}", e);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

/// Mask an external account id for public display: keep the first three and
/// last two characters, hide the middle. Short ids are fully masked.
pub fn mask_account_id(account_id: &str) -> String {
    let chars: Vec<char> = account_id.chars().collect();
    if chars.len() <= 5 {
        return "*".repeat(chars.len().max(3));
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    /// In-memory stand-in for the remote transactional store.
    #[derive(Default)]
    struct MockRemote {
        tokens: DashMap<String, (LinkToken, bool)>,
        links: DashMap<u64, LinkRecord>,
        mailbox: DashMap<String, ()>,
        consume_calls: AtomicUsize,
    }

    impl MockRemote {
        fn with_token(token: &str, account: &str) -> Self {
            let remote = Self::default();
            remote.tokens.insert(
                token.to_string(),
                (
                    LinkToken {
                        doc_name: format!("link_tokens/{}", token),
                        token: token.to_string(),
                        account_id: account.to_string(),
                        update_time: "v1".to_string(),
                    },
                    false,
                ),
            );
            remote
        }
    }

    #[async_trait]
    impl LinkTokenStore for MockRemote {
        async fn find_unused_token(&self, token: &str) -> Result<Option<LinkToken>, LinkError> {
            Ok(self
                .tokens
                .get(token)
                .filter(|entry| !entry.1)
                .map(|entry| entry.0.clone()))
        }

        async fn get_link(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError> {
            Ok(self.links.get(&discord_id).map(|r| r.clone()))
        }

        async fn consume_token(
            &self,
            token: &LinkToken,
            record: &LinkRecord,
        ) -> Result<(), LinkError> {
            self.consume_calls.fetch_add(1, Ordering::SeqCst);

            // Transactional semantics: the unused predicate is re-checked
            // against the revision seen at read time.
            let mut entry = self
                .tokens
                .get_mut(&token.token)
                .ok_or(LinkError::InvalidToken)?;
            if entry.1 || entry.0.update_time != token.update_time {
                return Err(LinkError::TokenConflict);
            }
            if self.links.contains_key(&record.discord_id) {
                return Err(LinkError::AlreadyLinked);
            }

            entry.1 = true;
            entry.0.update_time = "v2".to_string();
            self.links.insert(record.discord_id, record.clone());
            self.mailbox.insert(record.account_id.clone(), ());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockMirror {
        rows: DashMap<u64, LinkRecord>,
    }

    #[async_trait]
    impl LinkMirrorStore for MockMirror {
        async fn get(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError> {
            Ok(self.rows.get(&discord_id).map(|r| r.clone()))
        }

        async fn save(&self, record: &LinkRecord) -> Result<(), LinkError> {
            self.rows.insert(record.discord_id, record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_link_consumes_token_and_mirrors_locally() {
        let service = LinkService::new(MockRemote::with_token("ABC123", "steam-77"), MockMirror::default());

        let record = service.link_account(1, 10, "ABC123", now()).await.unwrap();
        assert_eq!(record.account_id, "steam-77");

        assert_eq!(service.mirror.rows.len(), 1);
        assert!(service.remote.mailbox.contains_key("steam-77"));
        assert!(service
            .remote
            .find_unused_token("ABC123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_link_attempt_is_rejected_without_consuming_a_token() {
        let remote = MockRemote::with_token("ABC123", "steam-77");
        remote.tokens.insert(
            "XYZ999".to_string(),
            (
                LinkToken {
                    doc_name: "link_tokens/XYZ999".into(),
                    token: "XYZ999".into(),
                    account_id: "steam-88".into(),
                    update_time: "v1".into(),
                },
                false,
            ),
        );
        let service = LinkService::new(remote, MockMirror::default());

        service.link_account(1, 10, "ABC123", now()).await.unwrap();
        let calls_after_first = service.remote.consume_calls.load(Ordering::SeqCst);

        let result = service.link_account(1, 10, "XYZ999", now()).await;
        assert!(matches!(result, Err(LinkError::AlreadyLinked)));
        // The second attempt never reached the consume step.
        assert_eq!(
            service.remote.consume_calls.load(Ordering::SeqCst),
            calls_after_first
        );
        assert!(service
            .remote
            .find_unused_token("XYZ999")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let service = LinkService::new(MockRemote::default(), MockMirror::default());
        let result = service.link_account(1, 10, "NOPE", now()).await;
        assert!(matches!(result, Err(LinkError::InvalidToken)));
    }

    #[tokio::test]
    async fn concurrent_consumption_lets_exactly_one_through() {
        let remote = Arc::new(MockRemote::with_token("ABC123", "steam-77"));

        // Both requests read the token before either commits.
        let token = remote.find_unused_token("ABC123").await.unwrap().unwrap();

        let first = LinkRecord {
            discord_id: 1,
            account_id: token.account_id.clone(),
            guild_id: 10,
            linked_at: now(),
        };
        let second = LinkRecord {
            discord_id: 2,
            ..first.clone()
        };

        assert!(remote.consume_token(&token, &first).await.is_ok());
        let loser = remote.consume_token(&token, &second).await;
        assert!(matches!(loser, Err(LinkError::TokenConflict)));
        assert_eq!(remote.links.len(), 1);
    }

    #[tokio::test]
    async fn status_backfills_the_mirror_from_remote() {
        let remote = MockRemote::default();
        remote.links.insert(
            1,
            LinkRecord {
                discord_id: 1,
                account_id: "steam-77".into(),
                guild_id: 10,
                linked_at: now(),
            },
        );
        let service = LinkService::new(remote, MockMirror::default());

        let status = service.link_status(1).await.unwrap();
        assert!(status.is_some());
        assert_eq!(service.mirror.rows.len(), 1);

        assert!(service.link_status(2).await.unwrap().is_none());
    }

    #[test]
    fn account_ids_are_masked_for_display() {
        assert_eq!(mask_account_id("steam-77"), "ste***77");
        assert_eq!(mask_account_id("ab"), "***");
        assert_eq!(mask_account_id("abcde"), "*****");
    }
}
