// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "leveling/leveling_service.rs"]
pub mod leveling;

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "linking/linking_service.rs"]
pub mod linking;

#[path = "tickets/ticket_service.rs"]
pub mod tickets;
