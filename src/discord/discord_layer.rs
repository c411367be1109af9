// Discord layer - commands and event handlers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "leveling/announcements.rs"]
pub mod leveling_announcements;

#[path = "moderation/events.rs"]
pub mod moderation_events;

#[path = "moderation/formatter.rs"]
pub mod moderation_formatter;

#[path = "tickets/interactions.rs"]
pub mod ticket_interactions;

// Re-export command types for convenience
pub use commands::leveling::{Context, Data, Error};
