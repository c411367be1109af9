// Button/modal adapters for the ticket system.
//
// The `/ticket` slash command and the panel modal both funnel into
// `create_ticket`, which takes explicit typed parameters - the two entry
// points share logic by calling the same function, not by faking each
// other's request objects.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use poise::serenity_prelude::{self as serenity, Mentionable};

use crate::core::tickets::{NewTicket, TicketError, TicketKind, TicketService};
use crate::discord::moderation_events::resolve_monitor_channel;
use crate::discord::Data;
use crate::infra::tickets::GistTicketStore;

pub const PANEL_BUTTON_ID: &str = "ticket_panel_open";
pub const MODAL_ID: &str = "ticket_modal";
const CLOSE_BUTTON_PREFIX: &str = "ticket_close_";

/// Route a component interaction. Returns true when it was ours.
pub async fn handle_component(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) -> Result<bool> {
    let custom_id = interaction.data.custom_id.as_str();

    if custom_id == PANEL_BUTTON_ID {
        show_ticket_modal(ctx, interaction).await?;
        return Ok(true);
    }

    if let Some(raw) = custom_id.strip_prefix(CLOSE_BUTTON_PREFIX) {
        if let Ok(channel_id) = raw.parse::<u64>() {
            handle_close_button(ctx, data, interaction, channel_id).await?;
            return Ok(true);
        }
    }

    Ok(false)
}

/// Route a modal submission. Returns true when it was ours.
pub async fn handle_modal(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ModalInteraction,
) -> Result<bool> {
    if interaction.data.custom_id != MODAL_ID {
        return Ok(false);
    }

    let mut kind_input = None;
    let mut description_input = None;
    for row in &interaction.data.components {
        for component in &row.components {
            if let serenity::ActionRowComponent::InputText(input) = component {
                match input.custom_id.as_str() {
                    "ticket_kind" => kind_input = input.value.clone(),
                    "ticket_description" => description_input = input.value.clone(),
                    _ => {}
                }
            }
        }
    }

    let Some(kind) = kind_input.as_deref().and_then(TicketKind::parse) else {
        interaction
            .create_response(
                &ctx.http,
                serenity::CreateInteractionResponse::Message(
                    serenity::CreateInteractionResponseMessage::new()
                        .content("❌ Invalid ticket kind. Use: bug / feature / general / urgent")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(true);
    };
    let description = description_input.unwrap_or_default();

    let Some(guild_id) = interaction.guild_id else {
        interaction
            .create_response(
                &ctx.http,
                serenity::CreateInteractionResponse::Message(
                    serenity::CreateInteractionResponseMessage::new()
                        .content("❌ Tickets can only be opened inside a server.")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(true);
    };

    interaction
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Defer(
                serenity::CreateInteractionResponseMessage::new().ephemeral(true),
            ),
        )
        .await?;

    let reply = create_ticket(ctx, data, guild_id, &interaction.user, kind, &description).await;

    interaction
        .edit_response(
            &ctx.http,
            serenity::EditInteractionResponse::new().content(reply),
        )
        .await?;

    Ok(true)
}

async fn show_ticket_modal(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
) -> Result<()> {
    let modal = serenity::CreateModal::new(MODAL_ID, "Open a ticket").components(vec![
        serenity::CreateActionRow::InputText(
            serenity::CreateInputText::new(
                serenity::InputTextStyle::Short,
                "Ticket kind",
                "ticket_kind",
            )
            .placeholder("bug / feature / general / urgent")
            .required(true)
            .max_length(10),
        ),
        serenity::CreateActionRow::InputText(
            serenity::CreateInputText::new(
                serenity::InputTextStyle::Paragraph,
                "Description",
                "ticket_description",
            )
            .placeholder("Describe your problem in detail...")
            .required(true)
            .min_length(10)
            .max_length(1000),
        ),
    ]);

    interaction
        .create_response(&ctx.http, serenity::CreateInteractionResponse::Modal(modal))
        .await?;
    Ok(())
}

/// Shared ticket-open flow used by both the slash command and the modal.
///
/// Always produces exactly one user-facing reply string; internal failures
/// are logged and mapped to a generic message.
pub async fn create_ticket(
    ctx: &serenity::Context,
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
    kind: TicketKind,
    description: &str,
) -> String {
    let (Some(tickets), Some(config)) = (data.tickets.clone(), data.config.tickets.as_ref())
    else {
        return "❌ The ticket system is not configured. Please contact an admin.".to_string();
    };

    // Reject over-cap requests before any channel is allocated.
    match tickets.can_open(user.id.get()).await {
        Ok(()) => {}
        Err(TicketError::TooManyOpen { open, max }) => {
            return format!(
                "❌ You already have {} open tickets (limit {}). Please close one first.",
                open, max
            );
        }
        Err(e) => {
            tracing::error!("Ticket storage check failed: {}", e);
            return "❌ Could not reach the ticket storage. Please try again later.".to_string();
        }
    }

    let now = Utc::now();
    let ticket_id = TicketService::<GistTicketStore>::ticket_id_from(now);
    let channel_name = format!("{}{}-{}", config.channel_prefix, user.id.get(), ticket_id);
    let topic = format!(
        "{} Ticket #{} | Creator: {} | Kind: {}",
        kind.emoji(),
        ticket_id,
        user.name,
        kind.label()
    );

    let bot_id = ctx.cache.current_user().id;
    let everyone_role = serenity::RoleId::new(guild_id.get());
    let member_perms = serenity::Permissions::VIEW_CHANNEL
        | serenity::Permissions::SEND_MESSAGES
        | serenity::Permissions::READ_MESSAGE_HISTORY
        | serenity::Permissions::ATTACH_FILES
        | serenity::Permissions::EMBED_LINKS;

    let mut overwrites = vec![
        serenity::PermissionOverwrite {
            allow: serenity::Permissions::empty(),
            deny: serenity::Permissions::VIEW_CHANNEL,
            kind: serenity::PermissionOverwriteType::Role(everyone_role),
        },
        serenity::PermissionOverwrite {
            allow: member_perms,
            deny: serenity::Permissions::empty(),
            kind: serenity::PermissionOverwriteType::Member(user.id),
        },
        serenity::PermissionOverwrite {
            allow: member_perms | serenity::Permissions::MANAGE_MESSAGES,
            deny: serenity::Permissions::empty(),
            kind: serenity::PermissionOverwriteType::Member(bot_id),
        },
    ];

    // Let operators into the channel too.
    let admin_role_id = ctx.cache.guild(guild_id).and_then(|guild| {
        guild
            .roles
            .values()
            .find(|role| role.permissions.administrator() && role.name != "@everyone")
            .map(|role| role.id)
    });
    if let Some(role_id) = admin_role_id {
        overwrites.push(serenity::PermissionOverwrite {
            allow: member_perms | serenity::Permissions::MANAGE_MESSAGES,
            deny: serenity::Permissions::empty(),
            kind: serenity::PermissionOverwriteType::Role(role_id),
        });
    }

    let mut builder = serenity::CreateChannel::new(channel_name)
        .kind(serenity::ChannelType::Text)
        .topic(topic)
        .permissions(overwrites);
    if let Some(category_id) = config.category_id {
        builder = builder.category(serenity::ChannelId::new(category_id));
    }

    let channel = match guild_id.create_channel(&ctx.http, builder).await {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!("Failed to create ticket channel: {}", e);
            return "❌ Could not create the ticket channel. Please try again later.".to_string();
        }
    };

    let new_ticket = NewTicket {
        user_id: user.id.get(),
        username: user.name.clone(),
        guild_id: guild_id.get(),
        channel_id: channel.id.get(),
        kind,
        description: description.to_string(),
        created_at: now,
    };

    if let Err(e) = tickets.open_ticket(new_ticket).await {
        tracing::error!("Failed to persist ticket {}: {}", ticket_id, e);
        // Don't leave an orphan channel behind.
        if let Err(delete_err) = channel.delete(&ctx.http).await {
            tracing::warn!("Failed to remove orphan ticket channel: {}", delete_err);
        }
        return match e {
            TicketError::TooManyOpen { open, max } => format!(
                "❌ You already have {} open tickets (limit {}). Please close one first.",
                open, max
            ),
            _ => "❌ Could not save the ticket. Please try again later.".to_string(),
        };
    }

    let close_button = serenity::CreateButton::new(format!(
        "{}{}",
        CLOSE_BUTTON_PREFIX,
        channel.id.get()
    ))
    .label("🔒 Close ticket")
    .style(serenity::ButtonStyle::Danger);

    let welcome = serenity::CreateEmbed::new()
        .title(format!("{} Ticket #{}", kind.emoji(), ticket_id))
        .description("Thanks for opening a ticket! An operator will reply as soon as possible.")
        .color(0x2ecc71)
        .field("👤 Creator", user.mention().to_string(), true)
        .field("📋 Kind", kind.label(), true)
        .field("🕒 Created", format!("<t:{}:F>", now.timestamp()), true)
        .field("📝 Description", description, false)
        .footer(serenity::CreateEmbedFooter::new(
            "The more detail you give, the faster we can help",
        ))
        .timestamp(serenity::Timestamp::now());

    if let Err(e) = channel
        .send_message(
            &ctx.http,
            serenity::CreateMessage::new()
                .content(format!("{} welcome to your ticket!", user.mention()))
                .embed(welcome)
                .components(vec![serenity::CreateActionRow::Buttons(vec![close_button])]),
        )
        .await
    {
        tracing::warn!("Failed to send ticket welcome message: {}", e);
    }

    if let Some(monitor) = resolve_monitor_channel(ctx, guild_id, &data.config.routing) {
        let notice = serenity::CreateEmbed::new()
            .title("🎫 New ticket")
            .color(0xff9500)
            .field("Creator", user.mention().to_string(), true)
            .field("Kind", format!("{} {}", kind.emoji(), kind.label()), true)
            .field("Channel", format!("<#{}>", channel.id.get()), true)
            .field("Description", description, false)
            .timestamp(serenity::Timestamp::now());

        if let Err(e) = monitor
            .send_message(&ctx.http, serenity::CreateMessage::new().embed(notice))
            .await
        {
            tracing::warn!("Failed to send ticket notice: {}", e);
        }
    }

    format!(
        "✅ Ticket created! Head to <#{}> to continue.",
        channel.id.get()
    )
}

async fn handle_close_button(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
    channel_id: u64,
) -> Result<()> {
    let Some(tickets) = data.tickets.clone() else {
        interaction
            .create_response(
                &ctx.http,
                serenity::CreateInteractionResponse::Message(
                    serenity::CreateInteractionResponseMessage::new()
                        .content("❌ The ticket system is not configured.")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };
    let close_delay = data
        .config
        .tickets
        .as_ref()
        .map(|c| c.close_delay)
        .unwrap_or(Duration::from_secs(5));

    let is_operator = interaction
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .map(|p| p.administrator())
        .unwrap_or(false);

    // Closing touches the remote store; defer so the token doesn't expire.
    interaction
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Defer(
                serenity::CreateInteractionResponseMessage::new(),
            ),
        )
        .await?;

    let outcome = tickets
        .close_ticket(channel_id, interaction.user.id.get(), is_operator, Utc::now())
        .await;

    let reply = match &outcome {
        Ok(record) => format!(
            "🔒 Ticket #{} closed by {}. This channel will be deleted in {} seconds.",
            record.ticket_id,
            interaction.user.mention(),
            close_delay.as_secs()
        ),
        Err(TicketError::AlreadyClosed) => "❌ This ticket is already closed.".to_string(),
        Err(TicketError::NotPermitted) => {
            "❌ Only the ticket creator or an operator can close this ticket.".to_string()
        }
        Err(TicketError::NotFound) => "❌ No ticket is associated with this channel.".to_string(),
        Err(e) => {
            tracing::error!("Failed to close ticket for channel {}: {}", channel_id, e);
            "❌ Could not close the ticket. Please try again later.".to_string()
        }
    };

    interaction
        .edit_response(
            &ctx.http,
            serenity::EditInteractionResponse::new().content(reply),
        )
        .await?;

    if outcome.is_ok() {
        // Give participants a moment to read the closing message, then drop
        // the channel. Best-effort: a failed delete is logged, not retried.
        let http = ctx.http.clone();
        let channel = serenity::ChannelId::new(channel_id);
        tokio::spawn(async move {
            tokio::time::sleep(close_delay).await;
            if let Err(e) = channel.delete(&http).await {
                tracing::warn!("Failed to delete ticket channel {}: {}", channel, e);
            }
        });
    }

    Ok(())
}
