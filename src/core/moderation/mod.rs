// Moderation mirror module - audit trail business logic.

#[path = "moderation_models.rs"]
pub mod moderation_models;

#[path = "moderation_service.rs"]
pub mod moderation_service;

pub use moderation_models::*;
pub use moderation_service::*;
