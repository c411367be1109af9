// Level-up announcements and role rewards.

use anyhow::Result;
use poise::serenity_prelude::{self as serenity, Context, Mentionable};

use crate::core::leveling::LevelUpEvent;
use crate::discord::Data;

/// Announce a level-up in the channel that triggered it and hand out the
/// configured role reward, if any. The role grant is best-effort: a failure
/// is logged and never blocks (or undoes) the announcement.
pub async fn send_level_up_embed(
    ctx: &Context,
    message: &serenity::Message,
    data: &Data,
    event: &LevelUpEvent,
) -> Result<()> {
    let embed = serenity::CreateEmbed::new()
        .title("🎉 Level up!")
        .description(format!(
            "🎊 Congrats {}, you reached **level {}**!",
            message.author.mention(),
            event.new_level
        ))
        .field("💫 Experience", format!("{} XP", event.total_xp), true)
        .field("📊 Level", format!("{}", event.new_level), true)
        .color(0x00ff00)
        .thumbnail(message.author.face())
        .timestamp(serenity::Timestamp::now());

    message
        .channel_id
        .send_message(&ctx.http, serenity::CreateMessage::new().embed(embed))
        .await?;

    let Some(role_name) = data
        .leveling
        .role_reward_for(event.new_level)
        .map(String::from)
    else {
        return Ok(());
    };

    let guild_id = serenity::GuildId::new(event.guild_id);
    let role_id = ctx.cache.guild(guild_id).and_then(|guild| {
        guild
            .roles
            .values()
            .find(|role| role.name == role_name)
            .map(|role| role.id)
    });

    let Some(role_id) = role_id else {
        tracing::warn!(
            "Configured reward role '{}' does not exist in guild {}",
            role_name,
            event.guild_id
        );
        return Ok(());
    };

    match ctx
        .http
        .add_member_role(
            guild_id,
            serenity::UserId::new(event.user_id),
            role_id,
            Some("Level reward"),
        )
        .await
    {
        Ok(()) => {
            let notice = format!(
                "🏆 {} earned the **{}** role!",
                message.author.mention(),
                role_name
            );
            if let Err(e) = message.channel_id.say(&ctx.http, notice).await {
                tracing::warn!("Failed to announce role reward: {}", e);
            }
        }
        Err(e) => {
            tracing::warn!(
                "Failed to grant role '{}' to {}: {}",
                role_name,
                event.user_id,
                e
            );
        }
    }

    Ok(())
}
