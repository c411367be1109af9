// Discord commands module.
// Each feature gets its own command file.

#[path = "leveling.rs"]
pub mod leveling;

#[path = "moderation.rs"]
pub mod moderation;

#[path = "linking.rs"]
pub mod linking;

#[path = "tickets.rs"]
pub mod tickets;
