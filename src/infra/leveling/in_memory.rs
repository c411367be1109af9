// In-memory implementation of XpStore.
//
// Used by the core leveling tests so the business logic can be exercised
// without a database; follows the same contract as the SQLite store.
#![allow(dead_code)]

use crate::core::leveling::{ExperienceRecord, LevelingError, XpStore};
use async_trait::async_trait;
use dashmap::DashMap;

/// Composite key: users progress separately per guild.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct UserGuildKey {
    user_id: u64,
    guild_id: u64,
}

/// DashMap-backed store, safe to share across async tasks without a Mutex.
pub struct InMemoryXpStore {
    data: DashMap<UserGuildKey, ExperienceRecord>,
}

impl InMemoryXpStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

#[async_trait]
impl XpStore for InMemoryXpStore {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ExperienceRecord>, LevelingError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self.data.get(&key).map(|entry| entry.clone()))
    }

    async fn save_record(&self, record: &ExperienceRecord) -> Result<(), LevelingError> {
        let key = UserGuildKey {
            user_id: record.user_id,
            guild_id: record.guild_id,
        };
        self.data.insert(key, record.clone());
        Ok(())
    }

    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ExperienceRecord>, LevelingError> {
        if limit == 0 {
            return Err(LevelingError::Storage(
                "Leaderboard limit must be at least 1".to_string(),
            ));
        }

        let mut records: Vec<ExperienceRecord> = self
            .data
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by(|a, b| b.xp.cmp(&a.xp));
        records.truncate(limit);

        Ok(records)
    }

    async fn delete_record(&self, user_id: u64, guild_id: u64) -> Result<bool, LevelingError> {
        let key = UserGuildKey { user_id, guild_id };
        Ok(self.data.remove(&key).is_some())
    }

    async fn count_records(&self, guild_id: u64) -> Result<u64, LevelingError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .count() as u64)
    }

    async fn average_level(&self, guild_id: u64) -> Result<f64, LevelingError> {
        let levels: Vec<u32> = self
            .data
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| entry.level)
            .collect();

        if levels.is_empty() {
            return Ok(0.0);
        }
        Ok(levels.iter().map(|&l| l as f64).sum::<f64>() / levels.len() as f64)
    }
}

impl Default for InMemoryXpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(user_id: u64, guild_id: u64, xp: u64, level: u32) -> ExperienceRecord {
        ExperienceRecord {
            user_id,
            guild_id,
            username: format!("user-{}", user_id),
            xp,
            level,
            message_count: xp / 15,
            last_award_at: None,
            joined_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let store = InMemoryXpStore::new();
        assert!(store.get_record(1, 10).await.unwrap().is_none());

        store.save_record(&record(1, 10, 150, 1)).await.unwrap();
        let loaded = store.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(loaded.xp, 150);

        // Saving again replaces in place.
        store.save_record(&record(1, 10, 300, 3)).await.unwrap();
        let loaded = store.get_record(1, 10).await.unwrap().unwrap();
        assert_eq!(loaded.xp, 300);
        assert_eq!(store.count_records(10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leaderboard_is_sorted_and_scoped_to_the_guild() {
        let store = InMemoryXpStore::new();
        store.save_record(&record(1, 100, 500, 5)).await.unwrap();
        store.save_record(&record(2, 100, 300, 3)).await.unwrap();
        store.save_record(&record(3, 100, 700, 7)).await.unwrap();
        store.save_record(&record(4, 200, 900, 9)).await.unwrap();

        let leaderboard = store.get_leaderboard(100, 10).await.unwrap();
        assert_eq!(leaderboard.len(), 3);
        assert_eq!(leaderboard[0].user_id, 3);
        assert_eq!(leaderboard[1].user_id, 1);
        assert_eq!(leaderboard[2].user_id, 2);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let store = InMemoryXpStore::new();
        store.save_record(&record(1, 10, 150, 1)).await.unwrap();

        assert!(store.delete_record(1, 10).await.unwrap());
        assert!(!store.delete_record(1, 10).await.unwrap());
    }

    #[tokio::test]
    async fn average_level_ignores_other_guilds() {
        let store = InMemoryXpStore::new();
        store.save_record(&record(1, 100, 200, 2)).await.unwrap();
        store.save_record(&record(2, 100, 400, 4)).await.unwrap();
        store.save_record(&record(3, 200, 900, 9)).await.unwrap();

        assert_eq!(store.average_level(100).await.unwrap(), 3.0);
        assert_eq!(store.average_level(999).await.unwrap(), 0.0);
    }
}
