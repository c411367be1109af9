// Slash commands for the ticket system.

use crate::core::tickets::TicketKind;
use crate::discord::moderation_formatter::format_local;
use crate::discord::ticket_interactions::{create_ticket, PANEL_BUTTON_ID};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TicketKindChoice {
    #[name = "🐛 Bug report"]
    Bug,
    #[name = "💡 Feature request"]
    Feature,
    #[name = "❓ General question"]
    General,
    #[name = "⚠️ Urgent issue"]
    Urgent,
}

impl From<TicketKindChoice> for TicketKind {
    fn from(value: TicketKindChoice) -> Self {
        match value {
            TicketKindChoice::Bug => TicketKind::Bug,
            TicketKindChoice::Feature => TicketKind::Feature,
            TicketKindChoice::General => TicketKind::General,
            TicketKindChoice::Urgent => TicketKind::Urgent,
        }
    }
}

/// Open a support ticket.
#[poise::command(slash_command, guild_only)]
pub async fn ticket(
    ctx: Context<'_>,
    #[description = "Describe your problem"]
    #[max_length = 100]
    description: String,
    #[description = "What kind of problem is it?"] kind: TicketKindChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    ctx.defer_ephemeral().await?;

    let reply = create_ticket(
        ctx.serenity_context(),
        ctx.data(),
        guild_id,
        ctx.author(),
        kind.into(),
        &description,
    )
    .await;

    ctx.say(reply).await?;
    Ok(())
}

/// Show ticket statistics (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn ticketstats(ctx: Context<'_>) -> Result<(), Error> {
    let Some(tickets) = ctx.data().tickets.clone() else {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ The ticket system is not configured.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    ctx.defer().await?;

    let stats = match tickets.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Failed to fetch ticket stats: {}", e);
            ctx.say("❌ Could not fetch ticket statistics.").await?;
            return Ok(());
        }
    };

    let mut embed = serenity::CreateEmbed::new()
        .title("📊 Ticket statistics")
        .color(0x3498db)
        .field("🎫 Total", stats.total.to_string(), true)
        .field("🟢 Open", stats.open.to_string(), true)
        .field("🔒 Closed", stats.closed.to_string(), true)
        .timestamp(serenity::Timestamp::now());

    if !stats.by_kind.is_empty() {
        let mut kinds: Vec<_> = stats.by_kind.iter().collect();
        kinds.sort_by_key(|(kind, _)| kind.label());
        let lines = kinds
            .iter()
            .map(|(kind, count)| format!("{} {}: {}", kind.emoji(), kind.label(), count))
            .collect::<Vec<_>>()
            .join("\n");
        embed = embed.field("📋 By kind", lines, false);
    }

    if let Some(last_updated) = stats.last_updated {
        embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
            "Last updated: {}",
            format_local(last_updated, ctx.data().config.display_timezone)
        )));
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Test the ticket storage connection (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn ticketcheck(ctx: Context<'_>) -> Result<(), Error> {
    let Some(tickets) = ctx.data().tickets.clone() else {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ The ticket system is not configured.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    ctx.defer_ephemeral().await?;

    match tickets.stats().await {
        Ok(stats) => {
            let last_updated = stats
                .last_updated
                .map(|ts| format_local(ts, ctx.data().config.display_timezone))
                .unwrap_or_else(|| "never".to_string());
            ctx.say(format!(
                "✅ Ticket storage reachable.\n📊 {} tickets on record\n🕒 Last updated: {}",
                stats.total, last_updated
            ))
            .await?;
        }
        Err(e) => {
            ctx.say(format!(
                "❌ Ticket storage check failed: {}\n\nVerify the gist id and the GitHub token's permissions.",
                e
            ))
            .await?;
        }
    }

    Ok(())
}

/// Post the open-a-ticket panel in this channel (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn ticketpanel(ctx: Context<'_>) -> Result<(), Error> {
    if ctx.data().tickets.is_none() {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ The ticket system is not configured.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    ctx.defer_ephemeral().await?;

    let max_open = ctx
        .data()
        .config
        .tickets
        .as_ref()
        .map(|c| c.max_open_per_user)
        .unwrap_or(3);

    let embed = serenity::CreateEmbed::new()
        .title("🎫 Support tickets")
        .description(
            "Need help or found a problem? Press the button below to open a \
             ticket and our team will get back to you.",
        )
        .color(0x5865f2)
        .field(
            "📋 Before you open one",
            format!(
                "• Describe your problem in detail\n\
                 • Pick the right kind\n\
                 • You can have at most {} tickets open at once\n\
                 • Abuse of the system will be sanctioned",
                max_open
            ),
            false,
        )
        .field(
            "⏰ Response times",
            "General issues: within 24 hours\nUrgent issues: within 2 hours",
            false,
        )
        .timestamp(serenity::Timestamp::now());

    let button = serenity::CreateButton::new(PANEL_BUTTON_ID)
        .label("🎫 Open a ticket")
        .style(serenity::ButtonStyle::Primary);

    ctx.channel_id()
        .send_message(
            &ctx.serenity_context().http,
            serenity::CreateMessage::new()
                .embed(embed)
                .components(vec![serenity::CreateActionRow::Buttons(vec![button])]),
        )
        .await?;

    ctx.say("✅ Ticket panel posted!").await?;
    Ok(())
}
