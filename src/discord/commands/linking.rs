// Commands for the external account-link workflow.

use crate::core::linking::{mask_account_id, LinkError};
use crate::discord::moderation_events::resolve_monitor_channel;
use crate::discord::{Context, Error};
use poise::serenity_prelude::{self as serenity, Mentionable};

/// Link your Discord account to your external account with a one-time code.
#[poise::command(slash_command, guild_only)]
pub async fn link(
    ctx: Context<'_>,
    #[description = "Your one-time link code"] code: String,
) -> Result<(), Error> {
    let Some(linking) = ctx.data().linking.clone() else {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ Account linking is not configured. Please contact an admin.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let discord_id = ctx.author().id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // The remote transaction can take a moment; defer so the interaction
    // doesn't expire.
    ctx.defer_ephemeral().await?;

    match linking
        .link_account(discord_id, guild_id, &code, chrono::Utc::now())
        .await
    {
        Ok(record) => {
            ctx.say(format!(
                "✅ Linked! Your Discord account is now connected to `{}`.",
                mask_account_id(&record.account_id)
            ))
            .await?;

            notify_link(&ctx, &record.account_id).await;
        }
        Err(LinkError::AlreadyLinked) => {
            ctx.say("❌ Your Discord account is already linked.").await?;
        }
        Err(LinkError::InvalidToken) | Err(LinkError::TokenConflict) => {
            ctx.say("❌ Invalid code. Double-check it and try again.")
                .await?;
        }
        Err(e) => {
            tracing::error!("Link attempt failed: {}", e);
            ctx.say("❌ Linking failed. Please try again later.").await?;
        }
    }

    Ok(())
}

/// Check whether your Discord account is linked.
#[poise::command(slash_command, guild_only)]
pub async fn linkstatus(ctx: Context<'_>) -> Result<(), Error> {
    let Some(linking) = ctx.data().linking.clone() else {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ Account linking is not configured. Please contact an admin.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let discord_id = ctx.author().id.get();
    ctx.defer_ephemeral().await?;

    match linking.link_status(discord_id).await {
        Ok(Some(record)) => {
            ctx.say(format!(
                "🔗 Linked to `{}`.",
                mask_account_id(&record.account_id)
            ))
            .await?;
        }
        Ok(None) => {
            ctx.say("You are not linked yet. Use `/link` with your one-time code.")
                .await?;
        }
        Err(e) => {
            tracing::error!("Link status lookup failed: {}", e);
            ctx.say("❌ Could not check your link status right now.")
                .await?;
        }
    }

    Ok(())
}

/// Best-effort notice to the monitor channel about a successful link.
async fn notify_link(ctx: &Context<'_>, account_id: &str) {
    let Some(guild_id) = ctx.guild_id() else {
        return;
    };

    let Some(channel) = resolve_monitor_channel(
        ctx.serenity_context(),
        guild_id,
        &ctx.data().config.routing,
    ) else {
        return;
    };

    let embed = serenity::CreateEmbed::new()
        .title("🔗 Account linked")
        .description(format!(
            "{} linked their account to `{}`.",
            ctx.author().mention(),
            mask_account_id(account_id)
        ))
        .color(0x2ecc71)
        .timestamp(serenity::Timestamp::now());

    if let Err(e) = channel
        .send_message(
            &ctx.serenity_context().http,
            serenity::CreateMessage::new().embed(embed),
        )
        .await
    {
        tracing::warn!("Failed to send link notice: {}", e);
    }
}
