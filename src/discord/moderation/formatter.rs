// Embed formatting for moderation notices.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

use crate::core::moderation::{DeletedMessageRecord, MemberLeaveRecord};

/// Render a timestamp in the community's display timezone.
pub fn format_local(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_deleted_message_embed(record: &DeletedMessageRecord, tz: Tz) -> CreateEmbed {
    let content = if record.content.is_empty() {
        "(no text content)".to_string()
    } else if record.content.chars().count() > 1024 {
        record.content.chars().take(1024).collect()
    } else {
        record.content.clone()
    };

    let mut embed = CreateEmbed::default()
        .title("🗑️ Message deleted")
        .color(0xe74c3c)
        .field("👤 User", record.username.clone(), true)
        .field("📍 Channel", format!("<#{}>", record.channel_id), true)
        .field("⏰ Time", format_local(record.deleted_at, tz), true)
        .field("💬 Content", content, false)
        .footer(CreateEmbedFooter::new(format!(
            "Message ID: {}",
            record.message_id
        )))
        .timestamp(serenity::Timestamp::now());

    if !record.attachment_urls.is_empty() {
        embed = embed.field("📎 Attachments", record.attachment_urls.join(", "), false);
    }

    embed
}

pub fn format_member_left_embed(
    record: &MemberLeaveRecord,
    avatar_url: Option<String>,
    tz: Tz,
) -> CreateEmbed {
    let tenure = record
        .tenure_days()
        .map(|days| format!("{} days", days))
        .unwrap_or_else(|| "unknown".to_string());
    let roles = if record.role_names.is_empty() {
        "none".to_string()
    } else {
        record.role_names.join(", ")
    };

    let mut embed = CreateEmbed::default()
        .title("👋 Member left")
        .color(0x95a5a6)
        .field("👤 User", record.username.clone(), true)
        .field("🆔 ID", record.user_id.to_string(), true)
        .field("📅 Stayed for", tenure, true)
        .field("🏷️ Roles", roles, false)
        .footer(CreateEmbedFooter::new(format!(
            "Left at: {}",
            format_local(record.left_at, tz)
        )))
        .timestamp(serenity::Timestamp::now());

    if let Some(url) = avatar_url {
        embed = embed.thumbnail(url);
    }
    embed
}

pub fn format_member_join_embed(
    username: &str,
    user_id: u64,
    member_count: u64,
    avatar_url: Option<String>,
    joined_at: DateTime<Utc>,
    tz: Tz,
) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎉 Member joined")
        .color(0x2ecc71)
        .field("👤 User", username.to_string(), true)
        .field("🆔 ID", user_id.to_string(), true)
        .field("📊 Member count", member_count.to_string(), true)
        .footer(CreateEmbedFooter::new(format!(
            "Joined at: {}",
            format_local(joined_at, tz)
        )))
        .timestamp(serenity::Timestamp::now());

    if let Some(url) = avatar_url {
        embed = embed.thumbnail(url);
    }
    embed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_formatting_applies_the_timezone_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        // Asia/Taipei is UTC+8 year-round.
        assert_eq!(format_local(ts, chrono_tz::Asia::Taipei), "2024-05-01 20:00");
        assert_eq!(format_local(ts, chrono_tz::UTC), "2024-05-01 12:00");
    }
}
