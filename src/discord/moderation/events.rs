// Gateway event adapters for the moderation mirror and the welcome flow.
//
// Each handler persists its audit row and posts its notice as two
// independent best-effort effects: a failure in one never blocks the other.

use anyhow::Result;
use chrono::Utc;
use poise::serenity_prelude::{self as serenity, Context, Mentionable};

use crate::config::RoutingConfig;
use crate::core::moderation::{DeletedMessageRecord, MemberLeaveRecord, TrackedMessage};
use crate::discord::moderation_formatter::{
    format_deleted_message_embed, format_member_join_embed, format_member_left_embed,
};
use crate::discord::Data;

/// Monitor channel: the configured fixed id wins; otherwise the first text
/// channel matching the configured name.
pub fn resolve_monitor_channel(
    ctx: &Context,
    guild_id: serenity::GuildId,
    routing: &RoutingConfig,
) -> Option<serenity::ChannelId> {
    if let Some(id) = routing.monitor_channel_id {
        return Some(serenity::ChannelId::new(id));
    }

    ctx.cache.guild(guild_id).and_then(|guild| {
        guild
            .channels
            .values()
            .find(|channel| {
                channel.kind == serenity::ChannelType::Text
                    && channel.name == routing.monitor_channel_name
            })
            .map(|channel| channel.id)
    })
}

fn channel_name(ctx: &Context, guild_id: serenity::GuildId, channel_id: serenity::ChannelId) -> String {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.channels.get(&channel_id).map(|c| c.name.clone()))
        .unwrap_or_else(|| channel_id.to_string())
}

/// Snapshot every guild message so a later delete can be mirrored even after
/// Serenity's cache evicts the original.
pub fn handle_message(ctx: &Context, data: &Data, message: &serenity::Message) {
    let Some(guild_id) = message.guild_id else {
        return;
    };

    data.audit.remember_message(TrackedMessage {
        message_id: message.id.get(),
        guild_id: guild_id.get(),
        channel_id: message.channel_id.get(),
        channel_name: channel_name(ctx, guild_id, message.channel_id),
        author_id: message.author.id.get(),
        author_name: message.author.name.clone(),
        content: message.content.clone(),
        attachment_urls: message.attachments.iter().map(|a| a.url.clone()).collect(),
    });
}

pub async fn handle_message_delete(
    ctx: &Context,
    data: &Data,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
    guild_id: Option<serenity::GuildId>,
) -> Result<()> {
    let Some(guild_id) = guild_id else {
        return Ok(());
    };

    // Prefer our own snapshot; fall back to Serenity's cache.
    let snapshot = data
        .audit
        .take_tracked_message(message_id.get())
        .or_else(|| {
            ctx.cache.message(channel_id, message_id).and_then(|message| {
                if message.author.bot {
                    return None;
                }
                Some(TrackedMessage {
                    message_id: message.id.get(),
                    guild_id: guild_id.get(),
                    channel_id: message.channel_id.get(),
                    channel_name: String::new(),
                    author_id: message.author.id.get(),
                    author_name: message.author.name.clone(),
                    content: message.content.clone(),
                    attachment_urls: message.attachments.iter().map(|a| a.url.clone()).collect(),
                })
            })
        });

    let Some(mut snapshot) = snapshot else {
        // Nothing known about this message; nothing to mirror.
        return Ok(());
    };
    if snapshot.guild_id != guild_id.get() {
        return Ok(());
    }
    if snapshot.channel_name.is_empty() {
        snapshot.channel_name = channel_name(ctx, guild_id, channel_id);
    }

    let record = DeletedMessageRecord {
        id: None,
        message_id: snapshot.message_id,
        user_id: snapshot.author_id,
        username: snapshot.author_name,
        channel_id: snapshot.channel_id,
        channel_name: snapshot.channel_name,
        content: snapshot.content,
        attachment_urls: snapshot.attachment_urls,
        guild_id: guild_id.get(),
        deleted_at: Utc::now(),
    };

    // Effect 1: the audit row.
    if let Err(e) = data.audit.record_deleted_message(&record).await {
        tracing::error!("Failed to persist deleted-message audit row: {}", e);
    }

    // Effect 2: the monitor notice. Suppressed for content-less deletions.
    if data.audit.should_notify_deletion(&record) {
        if let Some(channel) = resolve_monitor_channel(ctx, guild_id, &data.config.routing) {
            let embed = format_deleted_message_embed(&record, data.config.display_timezone);
            if let Err(e) = channel
                .send_message(&ctx.http, serenity::CreateMessage::new().embed(embed))
                .await
            {
                tracing::warn!("Failed to send deletion notice: {}", e);
            }
        }
    }

    Ok(())
}

pub async fn handle_member_join(
    ctx: &Context,
    data: &Data,
    member: &serenity::Member,
) -> Result<()> {
    let guild_id = member.guild_id;
    let now = Utc::now();

    // Effect 1: a fresh zeroed ledger row.
    if let Err(e) = data
        .leveling
        .member_joined(member.user.id.get(), guild_id.get(), &member.user.name, now)
        .await
    {
        tracing::error!("Failed to create ledger row on join: {}", e);
    }

    // Effect 2: the welcome notice with the current member count.
    let member_count = ctx
        .cache
        .guild(guild_id)
        .map(|guild| guild.member_count)
        .unwrap_or(0);

    if let Some(channel) = resolve_monitor_channel(ctx, guild_id, &data.config.routing) {
        let embed = format_member_join_embed(
            &member.user.name,
            member.user.id.get(),
            member_count,
            member.user.avatar_url(),
            now,
            data.config.display_timezone,
        );
        if let Err(e) = channel
            .send_message(
                &ctx.http,
                serenity::CreateMessage::new()
                    .content(format!("Welcome, {}!", member.mention()))
                    .embed(embed),
            )
            .await
        {
            tracing::warn!("Failed to send welcome notice: {}", e);
        }
    }

    Ok(())
}

pub async fn handle_member_remove(
    ctx: &Context,
    data: &Data,
    guild_id: serenity::GuildId,
    user: &serenity::User,
    member_data: Option<&serenity::Member>,
) -> Result<()> {
    let role_names: Vec<String> = member_data
        .map(|member| {
            ctx.cache
                .guild(guild_id)
                .map(|guild| {
                    member
                        .roles
                        .iter()
                        .filter_map(|role_id| guild.roles.get(role_id).map(|r| r.name.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
        .unwrap_or_default();

    let record = MemberLeaveRecord {
        id: None,
        user_id: user.id.get(),
        username: user.name.clone(),
        role_names,
        guild_id: guild_id.get(),
        joined_at: member_data.and_then(|m| m.joined_at).map(|t| *t),
        left_at: Utc::now(),
    };

    // Effect 1: the audit row.
    if let Err(e) = data.audit.record_member_leave(&record).await {
        tracing::error!("Failed to persist member-leave audit row: {}", e);
    }

    // Effect 2: the departure notice.
    if let Some(channel) = resolve_monitor_channel(ctx, guild_id, &data.config.routing) {
        let embed =
            format_member_left_embed(&record, user.avatar_url(), data.config.display_timezone);
        if let Err(e) = channel
            .send_message(&ctx.http, serenity::CreateMessage::new().embed(embed))
            .await
        {
            tracing::warn!("Failed to send departure notice: {}", e);
        }
    }

    Ok(())
}
