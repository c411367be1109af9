use crate::core::linking::{LinkError, LinkMirrorStore, LinkRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

/// Local mirror of committed account links, for fast status lookups.
pub struct SqliteLinkMirror {
    pool: Pool<Sqlite>,
}

impl SqliteLinkMirror {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_links (
                discord_id INTEGER PRIMARY KEY,
                account_id TEXT NOT NULL,
                guild_id INTEGER NOT NULL,
                linked_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LinkMirrorStore for SqliteLinkMirror {
    async fn get(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError> {
        let row = sqlx::query("SELECT * FROM account_links WHERE discord_id = ?")
            .bind(discord_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LinkError::Storage(e.to_string()))?;

        Ok(row.map(|row| LinkRecord {
            discord_id: row.get::<i64, _>("discord_id") as u64,
            account_id: row.get("account_id"),
            guild_id: row.get::<i64, _>("guild_id") as u64,
            linked_at: row.get::<DateTime<Utc>, _>("linked_at"),
        }))
    }

    async fn save(&self, record: &LinkRecord) -> Result<(), LinkError> {
        sqlx::query(
            r#"
            INSERT INTO account_links (discord_id, account_id, guild_id, linked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(discord_id) DO UPDATE SET
                account_id = excluded.account_id,
                guild_id = excluded.guild_id,
                linked_at = excluded.linked_at
            "#,
        )
        .bind(record.discord_id as i64)
        .bind(&record.account_id)
        .bind(record.guild_id as i64)
        .bind(record.linked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LinkError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn open_store() -> (SqliteLinkMirror, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.db");
        std::fs::File::create(&path).unwrap();
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        let store = SqliteLinkMirror::new(pool);
        store.migrate().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn round_trips_a_link() {
        let (store, _dir) = open_store().await;

        assert!(store.get(42).await.unwrap().is_none());

        let record = LinkRecord {
            discord_id: 42,
            account_id: "steam-77".into(),
            guild_id: 10,
            linked_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        store.save(&record).await.unwrap();

        let loaded = store.get(42).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let (store, _dir) = open_store().await;

        let record = LinkRecord {
            discord_id: 42,
            account_id: "steam-77".into(),
            guild_id: 10,
            linked_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        store.save(&record).await.unwrap();
        store
            .save(&LinkRecord {
                account_id: "steam-88".into(),
                ..record.clone()
            })
            .await
            .unwrap();

        let loaded = store.get(42).await.unwrap().unwrap();
        assert_eq!(loaded.account_id, "steam-88");
    }
}
