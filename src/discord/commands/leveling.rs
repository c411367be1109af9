// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::config::BotConfig;
use crate::core::leveling::LevelingService;
use crate::core::linking::LinkService;
use crate::core::moderation::AuditService;
use crate::core::tickets::TicketService;
use crate::discord::moderation_formatter::format_local;
use crate::infra::leveling::SqliteXpStore;
use crate::infra::linking::{FirestoreLinkStore, SqliteLinkMirror};
use crate::infra::moderation::SqliteAuditStore;
use crate::infra::tickets::GistTicketStore;
use poise::serenity_prelude as serenity;

/// Show a member's level and experience.
#[poise::command(slash_command, guild_only)]
pub async fn level(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    if target_user.bot {
        ctx.say("Bots don't have levels! 🤖").await?;
        return Ok(());
    }

    let user_id = target_user.id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let record = ctx.data().leveling.get_record(user_id, guild_id).await?;

    let Some(record) = record else {
        ctx.send(
            poise::CreateReply::default()
                .content(format!("{} has no level record yet!", target_user.name))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let leveling = &ctx.data().leveling;
    let previous_threshold = if record.xp >= leveling.threshold_for(record.level) {
        leveling.threshold_for(record.level)
    } else {
        0
    };
    let next_threshold = leveling.xp_for_next_level(record.level);
    let progress = record.xp.saturating_sub(previous_threshold);
    let span = next_threshold.saturating_sub(previous_threshold);
    let progress_pct = if span > 0 {
        progress as f64 / span as f64
    } else {
        0.0
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("🎮 {}'s level", target_user.name))
        .color(0x3498db)
        .thumbnail(target_user.face())
        .field("📊 Level", format!("{}", record.level), true)
        .field("⭐ Experience", format!("{} XP", record.xp), true)
        .field("💬 Messages", format!("{}", record.message_count), true)
        .field(
            "📈 Progress",
            format!(
                "{}/{} XP\n{}",
                progress,
                span,
                build_progress_bar(progress_pct, 15)
            ),
            false,
        )
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Joined: {}",
            format_local(record.joined_at, ctx.data().config.display_timezone)
        )))
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Show the server's experience leaderboard.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "How many entries to show (1-20)"]
    #[min = 1]
    #[max = 20]
    count: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let limit = count.unwrap_or(10).clamp(1, 20);

    let records = ctx.data().leveling.get_leaderboard(guild_id, limit).await?;

    if records.is_empty() {
        ctx.say("No one has earned XP yet! Start chatting to get on the leaderboard! 💬")
            .await?;
        return Ok(());
    }

    let mut description = String::new();
    for (index, record) in records.iter().enumerate() {
        let medals = ["🥇", "🥈", "🥉"];
        let medal = medals
            .get(index)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("{}.", index + 1));
        description.push_str(&format!(
            "{} **{}** — Level {} ({} XP)\n",
            medal, record.username, record.level, record.xp
        ));
    }

    let embed = serenity::CreateEmbed::new()
        .title("🏆 Leaderboard")
        .description(description)
        .color(0xf39c12)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Top {} members",
            records.len()
        )))
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Wipe a member's level record (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn reset_level(
    ctx: Context<'_>,
    #[description = "User whose record to reset"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let existed = ctx.data().leveling.reset(user.id.get(), guild_id).await?;

    let reply = if existed {
        format!(
            "✅ Reset {}'s level data. Their next message starts them over at level 1.",
            user.name
        )
    } else {
        format!("{} has no level record to reset.", user.name)
    };
    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;

    Ok(())
}

pub fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    if filled > length {
        filled = length;
    }
    let filled_char = "▰";
    let empty_char = "▱";
    let bar = filled_char.repeat(filled) + &empty_char.repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
/// This is where we store our services and configuration.
use std::sync::Arc;

pub struct Data {
    pub config: Arc<BotConfig>,
    pub leveling: Arc<LevelingService<SqliteXpStore>>,
    pub audit: Arc<AuditService<SqliteAuditStore>>,
    /// None when the remote document store is not configured.
    pub linking: Option<Arc<LinkService<FirestoreLinkStore, SqliteLinkMirror>>>,
    /// None when the gist backing store is not configured.
    pub tickets: Option<Arc<TicketService<GistTicketStore>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_clamps_and_rounds() {
        assert_eq!(build_progress_bar(0.0, 5), "▱▱▱▱▱ (0%)");
        assert_eq!(build_progress_bar(1.0, 5), "▰▰▰▰▰ (100%)");
        assert_eq!(build_progress_bar(2.0, 5), "▰▰▰▰▰ (100%)");
        // Any nonzero progress shows at least one filled segment.
        assert!(build_progress_bar(0.01, 5).starts_with('▰'));
    }
}
