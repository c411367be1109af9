// Admin commands for querying the moderation audit trail.

use crate::discord::moderation_formatter::format_local;
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Show the most recent deleted-message records (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn deleted_logs(
    ctx: Context<'_>,
    #[description = "How many records to show (1-10)"]
    #[min = 1]
    #[max = 10]
    count: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let limit = count.unwrap_or(5).clamp(1, 10);
    let tz = ctx.data().config.display_timezone;

    let records = ctx
        .data()
        .audit
        .recent_deleted_messages(guild_id, limit)
        .await?;

    if records.is_empty() {
        ctx.send(
            poise::CreateReply::default()
                .content("No deleted-message records found.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("🗑️ Recently deleted messages")
        .color(0xe74c3c)
        .timestamp(serenity::Timestamp::now());

    for (index, record) in records.iter().enumerate() {
        let content = if record.content.is_empty() {
            "(no text content)".to_string()
        } else {
            truncate(&record.content, 200)
        };

        embed = embed.field(
            format!("{}. {} - #{}", index + 1, record.username, record.channel_name),
            format!(
                "**Content:** {}\n**Time:** {}",
                content,
                format_local(record.deleted_at, tz)
            ),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}

/// Show the most recent member-departure records (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn leave_logs(
    ctx: Context<'_>,
    #[description = "How many records to show (1-10)"]
    #[min = 1]
    #[max = 10]
    count: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let limit = count.unwrap_or(5).clamp(1, 10);
    let tz = ctx.data().config.display_timezone;

    let records = ctx
        .data()
        .audit
        .recent_member_leaves(guild_id, limit)
        .await?;

    if records.is_empty() {
        ctx.send(
            poise::CreateReply::default()
                .content("No departure records found.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("👋 Recently departed members")
        .color(0x95a5a6)
        .timestamp(serenity::Timestamp::now());

    for (index, record) in records.iter().enumerate() {
        let tenure = record
            .tenure_days()
            .map(|days| format!("{} days", days))
            .unwrap_or_else(|| "unknown".to_string());
        let roles = if record.role_names.is_empty() {
            "none".to_string()
        } else {
            record.role_names.join(", ")
        };

        embed = embed.field(
            format!("{}. {}", index + 1, record.username),
            format!(
                "**Left:** {}\n**Stayed for:** {}\n**Roles:** {}",
                format_local(record.left_at, tz),
                tenure,
                roles
            ),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}

/// Show aggregate server statistics (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn server_stats(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let (guild_name, member_count, icon_url, created_at) = {
        let guild = ctx.guild().ok_or("Guild not in cache")?;
        (
            guild.name.clone(),
            guild.member_count,
            guild.icon_url(),
            *guild.id.created_at(),
        )
    };

    let tracked_users = ctx.data().leveling.tracked_user_count(guild_id).await?;
    let average_level = ctx.data().leveling.average_level(guild_id).await?;
    let deleted = ctx.data().audit.count_deleted_messages(guild_id).await?;
    let leaves = ctx.data().audit.count_member_leaves(guild_id).await?;

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("📊 {} statistics", guild_name))
        .color(0x9b59b6)
        .field("👥 Members", format!("{}", member_count), true)
        .field("📈 Tracked users", format!("{}", tracked_users), true)
        .field("📊 Average level", format!("{:.0}", average_level), true)
        .field("🗑️ Deleted messages", format!("{}", deleted), true)
        .field("👋 Departures", format!("{}", leaves), true)
        .field(
            "📅 Created",
            format_local(created_at, ctx.data().config.display_timezone),
            true,
        )
        .timestamp(serenity::Timestamp::now());

    if let Some(icon) = icon_url {
        embed = embed.thumbnail(icon);
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;

    Ok(())
}

fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 200), "short");
        let long = "あ".repeat(250);
        let cut = truncate(&long, 200);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 203);
    }
}
