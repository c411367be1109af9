use chrono::{DateTime, Utc};

/// Audit row for a deleted guild message. Append-only: once written it is
/// never updated or removed. Foreign references are denormalized snapshots,
/// not relational links.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct DeletedMessageRecord {
    /// Storage-assigned row id; None before the record is persisted.
    pub id: Option<i64>,
    pub message_id: u64,
    pub user_id: u64,
    pub username: String,
    pub channel_id: u64,
    pub channel_name: String,
    pub content: String,
    pub attachment_urls: Vec<String>,
    pub guild_id: u64,
    pub deleted_at: DateTime<Utc>,
}

/// Audit row for a member who left the guild.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct MemberLeaveRecord {
    pub id: Option<i64>,
    pub user_id: u64,
    pub username: String,
    pub role_names: Vec<String>,
    pub guild_id: u64,
    /// None when the member left before we ever recorded a join.
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: DateTime<Utc>,
}

impl MemberLeaveRecord {
    /// Whole days between join and leave, floor division. None means the
    /// tenure is unknown.
    pub fn tenure_days(&self) -> Option<i64> {
        self.joined_at.map(|joined| (self.left_at - joined).num_days())
    }
}

/// Minimal snapshot of a live message, kept in memory so deletions (which
/// arrive as bare ids) can be logged with their content even after Serenity's
/// cache has evicted the original.
#[derive(Debug, Clone)]
pub struct TrackedMessage {
    pub message_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub channel_name: String,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    pub attachment_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn tenure_is_floor_whole_days() {
        let record = MemberLeaveRecord {
            id: None,
            user_id: 1,
            username: "alice".into(),
            role_names: vec![],
            guild_id: 10,
            joined_at: Some(at(0)),
            left_at: at(86_400 * 3 + 86_399),
        };
        assert_eq!(record.tenure_days(), Some(3));
    }

    #[test]
    fn tenure_unknown_without_a_recorded_join() {
        let record = MemberLeaveRecord {
            id: None,
            user_id: 1,
            username: "alice".into(),
            role_names: vec![],
            guild_id: 10,
            joined_at: None,
            left_at: at(1000),
        };
        assert_eq!(record.tenure_days(), None);
    }
}
