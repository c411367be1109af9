// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use std::path::Path;
use std::sync::Arc;

use poise::serenity_prelude as serenity;

use crate::config::BotConfig;
use crate::core::leveling::{LevelingError, LevelingService};
use crate::core::linking::LinkService;
use crate::core::moderation::AuditService;
use crate::core::tickets::TicketService;
use crate::discord::leveling_announcements::send_level_up_embed;
use crate::discord::moderation_events;
use crate::discord::ticket_interactions;
use crate::discord::{Data, Error};
use crate::infra::leveling::SqliteXpStore;
use crate::infra::linking::firestore_store::ServiceAccountAuth;
use crate::infra::linking::{FirestoreLinkStore, SqliteLinkMirror};
use crate::infra::moderation::SqliteAuditStore;
use crate::infra::tickets::GistTicketStore;

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            // Ignore bot messages (including our own)
            if new_message.author.bot {
                return Ok(());
            }

            // Only process guild messages (not DMs)
            if let Some(guild_id) = new_message.guild_id {
                let user_id = new_message.author.id.get();
                let guild_id = guild_id.get();

                match data
                    .leveling
                    .process_message(
                        user_id,
                        guild_id,
                        &new_message.author.name,
                        chrono::Utc::now(),
                    )
                    .await
                {
                    Ok(Some(level_up)) => {
                        tracing::info!(
                            user_id = level_up.user_id,
                            guild_id = level_up.guild_id,
                            old_level = level_up.old_level,
                            new_level = level_up.new_level,
                            total_xp = level_up.total_xp,
                            "User leveled up"
                        );

                        // User leveled up! Announce it
                        if let Err(err) =
                            send_level_up_embed(ctx, new_message, data, &level_up).await
                        {
                            tracing::warn!("Failed to send level-up embed: {err}");
                        }
                    }
                    Ok(None) => {
                        // XP was awarded but no level up - nothing to do
                    }
                    Err(LevelingError::OnCooldown(_)) => {
                        // User is on cooldown - silently ignore
                    }
                    Err(e) => {
                        // Some other error - log it but don't crash
                        tracing::error!("Error processing XP for message: {}", e);
                    }
                }

                // Cache the message so delete events can be mirrored even when
                // Serenity's cache misses it.
                moderation_events::handle_message(ctx, data, new_message);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = moderation_events::handle_member_join(ctx, data, new_member).await {
                tracing::error!("Error handling member join: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberRemoval {
            guild_id,
            user,
            member_data_if_available,
        } => {
            if let Err(e) = moderation_events::handle_member_remove(
                ctx,
                data,
                *guild_id,
                user,
                member_data_if_available.as_ref(),
            )
            .await
            {
                tracing::error!("Error handling member remove: {}", e);
            }
        }
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            guild_id,
        } => {
            if let Err(e) = moderation_events::handle_message_delete(
                ctx,
                data,
                *channel_id,
                *deleted_message_id,
                *guild_id,
            )
            .await
            {
                tracing::error!("Error handling message delete: {}", e);
            }
        }
        serenity::FullEvent::InteractionCreate { interaction } => match interaction {
            serenity::Interaction::Component(component) => {
                if let Err(e) =
                    ticket_interactions::handle_component(ctx, data, component).await
                {
                    tracing::error!("Error handling component interaction: {}", e);
                }
            }
            serenity::Interaction::Modal(modal) => {
                if let Err(e) = ticket_interactions::handle_modal(ctx, data, modal).await {
                    tracing::error!("Error handling modal submit: {}", e);
                }
            }
            _ => {}
        },
        _ => {}
    }

    Ok(())
}

/// Framework-level error hook. Guarantees every failed command interaction
/// still gets exactly one human-readable reply.
async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            tracing::error!("Command `{}` failed: {}", ctx.command().name, error);
            let _ = ctx
                .say("❌ Something went wrong running that command. Please try again later.")
                .await;
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                tracing::error!("Error while handling error: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = Arc::new(BotConfig::from_env().expect("Invalid configuration"));

    // Keep the runtime database in a dedicated folder so the repo root stays tidy.
    std::fs::create_dir_all(&config.data_dir).expect("Failed to create data directory");
    let db_path = format!("{}/community.db", config.data_dir);
    if !Path::new(&db_path).exists() {
        std::fs::File::create(&db_path).expect("Failed to create SQLite file");
    }

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", db_path))
        .await
        .expect("Failed to connect to SQLite");

    let xp_store = SqliteXpStore::from_pool(pool.clone())
        .await
        .expect("Failed to migrate the leveling store");
    let leveling_service = Arc::new(LevelingService::new(xp_store, config.leveling.clone()));

    let audit_store = SqliteAuditStore::new(pool.clone());
    audit_store
        .migrate()
        .await
        .expect("Failed to migrate the audit store");
    let audit_service = Arc::new(AuditService::new(audit_store));

    // Account linking is optional: without the document-store config the
    // commands stay registered but reply "not configured".
    let linking_service = match config.linking.clone() {
        Some(linking_config) => match ServiceAccountAuth::from_env().await {
            Ok(auth) => {
                let remote = FirestoreLinkStore::new(auth, linking_config, config.remote_timeout)
                    .expect("Failed to create document-store client");
                let mirror = SqliteLinkMirror::new(pool.clone());
                mirror
                    .migrate()
                    .await
                    .expect("Failed to migrate the link mirror");
                Some(Arc::new(LinkService::new(remote, mirror)))
            }
            Err(e) => {
                tracing::warn!("Account linking disabled (no service account): {}", e);
                None
            }
        },
        None => {
            tracing::info!("FIRESTORE_PROJECT_ID not set; account linking disabled");
            None
        }
    };

    // Same for tickets: no gist config, no ticket system.
    let ticket_service = match config.tickets.as_ref() {
        Some(ticket_config) => {
            match GistTicketStore::new(ticket_config, config.remote_timeout) {
                Ok(store) => Some(Arc::new(TicketService::new(
                    store,
                    ticket_config.max_open_per_user,
                ))),
                Err(e) => {
                    tracing::warn!("Ticket system disabled: {}", e);
                    None
                }
            }
        }
        None => {
            tracing::info!("GITHUB_TOKEN/GIST_ID not set; ticket system disabled");
            None
        }
    };

    // Create the data structure that will be shared across all commands
    let data = Data {
        config: Arc::clone(&config),
        leveling: Arc::clone(&leveling_service),
        audit: Arc::clone(&audit_service),
        linking: linking_service,
        tickets: ticket_service,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================
    // Configure the poise framework with our commands and settings.

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            // Register all our commands here
            commands: vec![
                discord::commands::leveling::level(),
                discord::commands::leveling::leaderboard(),
                discord::commands::leveling::reset_level(),
                discord::commands::moderation::deleted_logs(),
                discord::commands::moderation::leave_logs(),
                discord::commands::moderation::server_stats(),
                discord::commands::linking::link(),
                discord::commands::linking::linkstatus(),
                discord::commands::tickets::ticket(),
                discord::commands::tickets::ticketstats(),
                discord::commands::tickets::ticketcheck(),
                discord::commands::tickets::ticketpanel(),
            ],
            // Event handler for messages and other events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                println!("🤖 Bot is starting up...");

                // Register slash commands globally (can take up to an hour to
                // propagate; use register_in_guild for faster iteration).
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                println!("✅ Commands registered!");

                ctx.set_activity(Some(serenity::ActivityData::watching(
                    "over the community",
                )));
                println!("🚀 Bot is ready!");

                Ok(data)
            })
        })
        .build();

    // Create the client and start the bot
    let mut settings = serenity::cache::Settings::default();
    settings.max_messages = 10000;

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .cache_settings(settings)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
