// Leveling module - all business logic for the experience/level system.
// No Discord-specific code here (no serenity, no poise imports); the service
// works with primitive ids and chrono timestamps so the Discord layer stays a
// thin adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::LevelingConfig;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A user's experience ledger entry for one guild.
///
/// Keyed by (user_id, guild_id): users progress separately in each guild.
/// `level` is always `level_for(xp)`; the service recomputes it on every
/// award.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperienceRecord {
    pub user_id: u64,
    pub guild_id: u64,
    pub username: String,
    pub xp: u64,
    pub level: u32,
    /// Number of messages that actually earned XP.
    pub message_count: u64,
    /// When this user last earned XP. Drives the cooldown gate.
    pub last_award_at: Option<DateTime<Utc>>,
    /// First time we saw this user (message or join event). Immutable.
    pub joined_at: DateTime<Utc>,
}

/// Emitted when an award pushes a user past a level threshold.
#[derive(Debug, Clone)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("User is on cooldown. Time remaining: {0:?}")]
    OnCooldown(Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid user or guild ID")]
    InvalidId,
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Persistence for experience records. The core defines WHAT it needs; the
/// infra layer decides HOW (SQLite in production, in-memory in tests).
#[async_trait]
pub trait XpStore: Send + Sync {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ExperienceRecord>, LevelingError>;

    /// Insert or fully replace the record for (user_id, guild_id).
    async fn save_record(&self, record: &ExperienceRecord) -> Result<(), LevelingError>;

    /// Top records for a guild, highest XP first.
    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ExperienceRecord>, LevelingError>;

    /// Remove the record entirely (admin reset). Returns whether a row existed.
    async fn delete_record(&self, user_id: u64, guild_id: u64) -> Result<bool, LevelingError>;

    async fn count_records(&self, guild_id: u64) -> Result<u64, LevelingError>;

    /// Mean level across the guild's records; 0.0 when there are none.
    async fn average_level(&self, guild_id: u64) -> Result<f64, LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The leveling engine. Generic over the storage implementation.
pub struct LevelingService<S: XpStore> {
    store: S,
    config: LevelingConfig,
    /// Serializes the read-modify-write per (user, guild) so two rapid
    /// messages from the same user cannot both pass the cooldown check.
    award_locks: DashMap<(u64, u64), Arc<Mutex<()>>>,
}

impl<S: XpStore> LevelingService<S> {
    pub fn new(store: S, config: LevelingConfig) -> Self {
        Self {
            store,
            config,
            award_locks: DashMap::new(),
        }
    }

    fn validate_ids(user_id: u64, guild_id: u64) -> Result<(), LevelingError> {
        if user_id == 0 || guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    fn lock_for(&self, user_id: u64, guild_id: u64) -> Arc<Mutex<()>> {
        self.award_locks
            .entry((user_id, guild_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Level for a given XP total. Linear thresholds: level L starts at
    /// `L * level_multiplier` XP, boundary inclusive (`level_for(L * K) == L`),
    /// floor of 1.
    pub fn level_for(&self, xp: u64) -> u32 {
        ((xp / self.config.level_multiplier) as u32).max(1)
    }

    /// XP at which `level` begins.
    pub fn threshold_for(&self, level: u32) -> u64 {
        level as u64 * self.config.level_multiplier
    }

    /// XP at which the level after `level` begins.
    pub fn xp_for_next_level(&self, level: u32) -> u64 {
        self.threshold_for(level + 1)
    }

    /// Role name granted at `level`, if one is configured.
    pub fn role_reward_for(&self, level: u32) -> Option<&str> {
        self.config.level_roles.get(&level).map(String::as_str)
    }

    /// Process one guild message from a non-bot author.
    ///
    /// Returns:
    /// - `Ok(Some(event))` - XP awarded and the user leveled up
    /// - `Ok(None)` - XP awarded, no level change
    /// - `Err(OnCooldown)` - inside the cooldown window; the record is left
    ///   entirely untouched (message_count counts awarded messages only)
    pub async fn process_message(
        &self,
        user_id: u64,
        guild_id: u64,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let lock = self.lock_for(user_id, guild_id);
        let _guard = lock.lock().await;

        let existing = self.store.get_record(user_id, guild_id).await?;
        let old_level = existing.as_ref().map(|r| r.level).unwrap_or(1);

        let record = match existing {
            None => ExperienceRecord {
                user_id,
                guild_id,
                username: username.to_string(),
                xp: self.config.xp_per_message,
                level: self.level_for(self.config.xp_per_message),
                message_count: 1,
                last_award_at: Some(now),
                joined_at: now,
            },
            Some(mut record) => {
                if let Some(last) = record.last_award_at {
                    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                    if elapsed < self.config.cooldown {
                        return Err(LevelingError::OnCooldown(self.config.cooldown - elapsed));
                    }
                }

                record.username = username.to_string();
                record.xp += self.config.xp_per_message;
                record.level = self.level_for(record.xp);
                record.message_count += 1;
                record.last_award_at = Some(now);
                record
            }
        };

        self.store.save_record(&record).await?;

        if record.level > old_level {
            Ok(Some(LevelUpEvent {
                user_id,
                guild_id,
                old_level,
                new_level: record.level,
                total_xp: record.xp,
            }))
        } else {
            Ok(None)
        }
    }

    /// Upsert a fresh zeroed ledger row when a member joins the guild.
    pub async fn member_joined(
        &self,
        user_id: u64,
        guild_id: u64,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let lock = self.lock_for(user_id, guild_id);
        let _guard = lock.lock().await;

        let record = ExperienceRecord {
            user_id,
            guild_id,
            username: username.to_string(),
            xp: 0,
            level: 1,
            message_count: 0,
            last_award_at: None,
            joined_at: now,
        };
        self.store.save_record(&record).await
    }

    pub async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ExperienceRecord>, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;
        self.store.get_record(user_id, guild_id).await
    }

    pub async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ExperienceRecord>, LevelingError> {
        if guild_id == 0 {
            return Err(LevelingError::InvalidId);
        }
        self.store.get_leaderboard(guild_id, limit).await
    }

    /// Remove a user's ledger row entirely. Their next message recreates it
    /// at level 1.
    pub async fn reset(&self, user_id: u64, guild_id: u64) -> Result<bool, LevelingError> {
        Self::validate_ids(user_id, guild_id)?;

        let lock = self.lock_for(user_id, guild_id);
        let _guard = lock.lock().await;

        self.store.delete_record(user_id, guild_id).await
    }

    pub async fn tracked_user_count(&self, guild_id: u64) -> Result<u64, LevelingError> {
        self.store.count_records(guild_id).await
    }

    pub async fn average_level(&self, guild_id: u64) -> Result<f64, LevelingError> {
        self.store.average_level(guild_id).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::leveling::InMemoryXpStore;
    use chrono::TimeZone;

    fn config() -> LevelingConfig {
        LevelingConfig {
            xp_per_message: 15,
            cooldown: Duration::from_secs(60),
            level_multiplier: 100,
            level_roles: [(5u32, "Active Member".to_string())].into_iter().collect(),
        }
    }

    fn service() -> LevelingService<InMemoryXpStore> {
        LevelingService::new(InMemoryXpStore::new(), config())
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn level_for_is_boundary_inclusive() {
        let service = service();

        assert_eq!(service.level_for(0), 1);
        assert_eq!(service.level_for(15), 1);
        assert_eq!(service.level_for(99), 1);
        assert_eq!(service.level_for(100), 1);
        assert_eq!(service.level_for(199), 1);
        assert_eq!(service.level_for(200), 2);
        assert_eq!(service.level_for(1485), 14);
        // Exactly at the threshold yields the new level, not the old one.
        assert_eq!(service.level_for(1500), 15);
    }

    #[test]
    fn level_for_is_monotonic() {
        let service = service();
        let mut previous = 0;
        for xp in (0u64..5_000).step_by(15) {
            let level = service.level_for(xp);
            assert!(level >= previous, "level regressed at xp={}", xp);
            previous = level;
        }
    }

    #[test]
    fn thresholds_round_trip() {
        let service = service();
        for level in 1..=50 {
            assert_eq!(service.level_for(service.threshold_for(level)), level);
        }
    }

    #[test]
    fn role_rewards_only_at_configured_levels() {
        let service = service();
        assert_eq!(service.role_reward_for(5), Some("Active Member"));
        assert_eq!(service.role_reward_for(4), None);
    }

    #[tokio::test]
    async fn first_message_creates_the_record() {
        let service = service();

        let result = service.process_message(1, 10, "alice", t(0)).await.unwrap();
        assert!(result.is_none());

        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 15);
        assert_eq!(record.level, 1);
        assert_eq!(record.message_count, 1);
        assert_eq!(record.last_award_at, Some(t(0)));
        assert_eq!(record.joined_at, t(0));
    }

    #[tokio::test]
    async fn cooldown_leaves_the_record_untouched() {
        let service = service();

        service.process_message(1, 10, "alice", t(0)).await.unwrap();
        let before = service.get_record(1, 10).await.unwrap().unwrap();

        let result = service.process_message(1, 10, "alice", t(30)).await;
        assert!(matches!(result, Err(LevelingError::OnCooldown(_))));

        let after = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn award_resumes_once_cooldown_elapses() {
        let service = service();

        service.process_message(1, 10, "alice", t(0)).await.unwrap();
        service.process_message(1, 10, "alice", t(60)).await.unwrap();

        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 30);
        assert_eq!(record.message_count, 2);
        assert_eq!(record.last_award_at, Some(t(60)));
    }

    #[tokio::test]
    async fn level_up_fires_exactly_at_the_threshold() {
        let service = service();

        // 99 qualifying messages: 99 * 15 = 1485 XP -> level 14.
        for i in 0i64..99 {
            service
                .process_message(1, 10, "alice", t(i * 60))
                .await
                .unwrap();
        }
        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 1485);
        assert_eq!(record.level, 14);

        // The 100th message crosses 1500 and transitions 14 -> 15.
        let event = service
            .process_message(1, 10, "alice", t(99 * 60))
            .await
            .unwrap()
            .expect("crossing a threshold must emit a level-up");
        assert_eq!(event.old_level, 14);
        assert_eq!(event.new_level, 15);
        assert_eq!(event.total_xp, 1500);
    }

    #[tokio::test]
    async fn no_level_up_within_a_level() {
        let service = service();

        service.process_message(1, 10, "alice", t(0)).await.unwrap();
        let event = service.process_message(1, 10, "alice", t(60)).await.unwrap();
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn reset_removes_the_row_and_next_message_starts_over() {
        let service = service();

        for i in 0i64..20 {
            let _ = service.process_message(1, 10, "alice", t(i * 60)).await;
        }
        assert!(service.reset(1, 10).await.unwrap());
        assert!(service.get_record(1, 10).await.unwrap().is_none());
        // Resetting an absent row reports that nothing existed.
        assert!(!service.reset(1, 10).await.unwrap());

        service
            .process_message(1, 10, "alice", t(10_000))
            .await
            .unwrap();
        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 15);
        assert_eq!(record.level, 1);
        assert_eq!(record.message_count, 1);
    }

    #[tokio::test]
    async fn member_join_upserts_a_zeroed_row() {
        let service = service();

        service.process_message(1, 10, "alice", t(0)).await.unwrap();
        service.member_joined(1, 10, "alice", t(500)).await.unwrap();

        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 0);
        assert_eq!(record.level, 1);
        assert_eq!(record.message_count, 0);
        assert_eq!(record.last_award_at, None);
        assert_eq!(record.joined_at, t(500));
    }

    #[tokio::test]
    async fn zero_ids_are_rejected() {
        let service = service();
        assert!(matches!(
            service.process_message(0, 10, "x", t(0)).await,
            Err(LevelingError::InvalidId)
        ));
        assert!(matches!(
            service.get_leaderboard(0, 10).await,
            Err(LevelingError::InvalidId)
        ));
    }

    #[tokio::test]
    async fn concurrent_messages_award_at_most_once_inside_the_window() {
        let service = Arc::new(service());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.process_message(1, 10, "alice", t(0)).await
            }));
        }

        let mut awarded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                awarded += 1;
            }
        }

        // The per-key lock serializes the read-modify-write: exactly one of
        // the racing messages lands, the rest hit the cooldown.
        assert_eq!(awarded, 1);
        let record = service.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(record.xp, 15);
    }
}
