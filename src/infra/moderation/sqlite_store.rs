use crate::core::moderation::{
    AuditError, AuditStore, DeletedMessageRecord, MemberLeaveRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

/// SQLite-backed audit store. Both tables are append-only; there are no
/// update or delete statements here on purpose.
pub struct SqliteAuditStore {
    pool: Pool<Sqlite>,
}

impl SqliteAuditStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deleted_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                content TEXT NOT NULL,
                attachments TEXT NOT NULL DEFAULT '',
                guild_id INTEGER NOT NULL,
                deleted_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS member_leaves (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                roles TEXT NOT NULL DEFAULT '',
                guild_id INTEGER NOT NULL,
                joined_at TEXT,
                left_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Lists are stored comma-joined in a single TEXT column (denormalized
/// snapshot, never queried per element).
fn join_list(items: &[String]) -> String {
    items.join(", ")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn record_deleted_message(
        &self,
        record: &DeletedMessageRecord,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO deleted_messages (
                message_id, user_id, username, channel_id, channel_name,
                content, attachments, guild_id, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.message_id as i64)
        .bind(record.user_id as i64)
        .bind(&record.username)
        .bind(record.channel_id as i64)
        .bind(&record.channel_name)
        .bind(&record.content)
        .bind(join_list(&record.attachment_urls))
        .bind(record.guild_id as i64)
        .bind(record.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn recent_deleted_messages(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<DeletedMessageRecord>, AuditError> {
        let rows = sqlx::query(
            "SELECT * FROM deleted_messages WHERE guild_id = ? ORDER BY deleted_at DESC, id DESC LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| DeletedMessageRecord {
                id: Some(row.get::<i64, _>("id")),
                message_id: row.get::<i64, _>("message_id") as u64,
                user_id: row.get::<i64, _>("user_id") as u64,
                username: row.get("username"),
                channel_id: row.get::<i64, _>("channel_id") as u64,
                channel_name: row.get("channel_name"),
                content: row.get("content"),
                attachment_urls: split_list(row.get::<&str, _>("attachments")),
                guild_id: row.get::<i64, _>("guild_id") as u64,
                deleted_at: row.get::<DateTime<Utc>, _>("deleted_at"),
            })
            .collect())
    }

    async fn record_member_leave(&self, record: &MemberLeaveRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO member_leaves (
                user_id, username, roles, guild_id, joined_at, left_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.user_id as i64)
        .bind(&record.username)
        .bind(join_list(&record.role_names))
        .bind(record.guild_id as i64)
        .bind(record.joined_at)
        .bind(record.left_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn recent_member_leaves(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<MemberLeaveRecord>, AuditError> {
        let rows = sqlx::query(
            "SELECT * FROM member_leaves WHERE guild_id = ? ORDER BY left_at DESC, id DESC LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| MemberLeaveRecord {
                id: Some(row.get::<i64, _>("id")),
                user_id: row.get::<i64, _>("user_id") as u64,
                username: row.get("username"),
                role_names: split_list(row.get::<&str, _>("roles")),
                guild_id: row.get::<i64, _>("guild_id") as u64,
                joined_at: row.get::<Option<DateTime<Utc>>, _>("joined_at"),
                left_at: row.get::<DateTime<Utc>, _>("left_at"),
            })
            .collect())
    }

    async fn count_deleted_messages(&self, guild_id: u64) -> Result<u64, AuditError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM deleted_messages WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn count_member_leaves(&self, guild_id: u64) -> Result<u64, AuditError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM member_leaves WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(row.get::<i64, _>("count") as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn open_store() -> (SqliteAuditStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        std::fs::File::create(&path).unwrap();
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        let store = SqliteAuditStore::new(pool);
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn deletion(message_id: u64, secs: i64) -> DeletedMessageRecord {
        DeletedMessageRecord {
            id: None,
            message_id,
            user_id: 1,
            username: "alice".into(),
            channel_id: 20,
            channel_name: "general".into(),
            content: "oops".into(),
            attachment_urls: vec![
                "https://cdn.example/a.png".into(),
                "https://cdn.example/b.png".into(),
            ],
            guild_id: 10,
            deleted_at: t(secs),
        }
    }

    #[tokio::test]
    async fn deleted_messages_round_trip_newest_first() {
        let (store, _dir) = open_store().await;

        store.record_deleted_message(&deletion(100, 0)).await.unwrap();
        store.record_deleted_message(&deletion(101, 60)).await.unwrap();
        store.record_deleted_message(&deletion(102, 30)).await.unwrap();

        let recent = store.recent_deleted_messages(10, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_id, 101);
        assert_eq!(recent[1].message_id, 102);
        assert_eq!(recent[0].attachment_urls.len(), 2);
        assert!(recent[0].id.is_some());

        assert_eq!(store.count_deleted_messages(10).await.unwrap(), 3);
        assert_eq!(store.count_deleted_messages(99).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn member_leaves_round_trip() {
        let (store, _dir) = open_store().await;

        let record = MemberLeaveRecord {
            id: None,
            user_id: 1,
            username: "alice".into(),
            role_names: vec!["Active Member".into(), "Veteran".into()],
            guild_id: 10,
            joined_at: Some(t(0)),
            left_at: t(86_400 * 7),
        };
        store.record_member_leave(&record).await.unwrap();

        let unknown_join = MemberLeaveRecord {
            joined_at: None,
            left_at: t(86_400 * 8),
            ..record.clone()
        };
        store.record_member_leave(&unknown_join).await.unwrap();

        let recent = store.recent_member_leaves(10, 5).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].joined_at, None);
        assert_eq!(recent[0].tenure_days(), None);
        assert_eq!(recent[1].role_names, vec!["Active Member", "Veteran"]);
        assert_eq!(recent[1].tenure_days(), Some(7));

        assert_eq!(store.count_member_leaves(10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_attachment_list_round_trips_empty() {
        let (store, _dir) = open_store().await;

        let mut record = deletion(100, 0);
        record.attachment_urls = vec![];
        store.record_deleted_message(&record).await.unwrap();

        let recent = store.recent_deleted_messages(10, 1).await.unwrap();
        assert!(recent[0].attachment_urls.is_empty());
    }
}
