use crate::core::leveling::{ExperienceRecord, LevelingError, XpStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed experience ledger.
pub struct SqliteXpStore {
    pool: Pool<Sqlite>,
}

impl SqliteXpStore {
    /// Open (creating if needed) a standalone database file. Production wiring
    /// shares one pool via `from_pool`; this is handy for tests and tools.
    #[allow(dead_code)]
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: Pool<Sqlite>) -> anyhow::Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_levels (
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                username TEXT NOT NULL DEFAULT '',
                xp INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 1,
                messages_count INTEGER NOT NULL DEFAULT 0,
                last_award_at TEXT,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (user_id, guild_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> ExperienceRecord {
    ExperienceRecord {
        user_id: row.get::<i64, _>("user_id") as u64,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        username: row.get("username"),
        xp: row.get::<i64, _>("xp") as u64,
        level: row.get::<i64, _>("level") as u32,
        message_count: row.get::<i64, _>("messages_count") as u64,
        last_award_at: row.get::<Option<DateTime<Utc>>, _>("last_award_at"),
        joined_at: row.get::<DateTime<Utc>, _>("joined_at"),
    }
}

#[async_trait]
impl XpStore for SqliteXpStore {
    async fn get_record(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<ExperienceRecord>, LevelingError> {
        let row = sqlx::query("SELECT * FROM user_levels WHERE user_id = ? AND guild_id = ?")
            .bind(user_id as i64)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.map(|row| row_to_record(&row)))
    }

    async fn save_record(&self, record: &ExperienceRecord) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO user_levels (
                user_id, guild_id, username, xp, level, messages_count,
                last_award_at, joined_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, guild_id) DO UPDATE SET
                username = excluded.username,
                xp = excluded.xp,
                level = excluded.level,
                messages_count = excluded.messages_count,
                last_award_at = excluded.last_award_at,
                joined_at = excluded.joined_at
            "#,
        )
        .bind(record.user_id as i64)
        .bind(record.guild_id as i64)
        .bind(&record.username)
        .bind(record.xp as i64)
        .bind(record.level as i64)
        .bind(record.message_count as i64)
        .bind(record.last_award_at)
        .bind(record.joined_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<ExperienceRecord>, LevelingError> {
        let rows =
            sqlx::query("SELECT * FROM user_levels WHERE guild_id = ? ORDER BY xp DESC LIMIT ?")
                .bind(guild_id as i64)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn delete_record(&self, user_id: u64, guild_id: u64) -> Result<bool, LevelingError> {
        let result = sqlx::query("DELETE FROM user_levels WHERE user_id = ? AND guild_id = ?")
            .bind(user_id as i64)
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_records(&self, guild_id: u64) -> Result<u64, LevelingError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM user_levels WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn average_level(&self, guild_id: u64) -> Result<f64, LevelingError> {
        let row = sqlx::query("SELECT AVG(level) AS avg FROM user_levels WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.get::<Option<f64>, _>("avg").unwrap_or(0.0))
    }
}
