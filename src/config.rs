// Startup configuration.
//
// Every tunable the bot needs is resolved from the environment exactly once,
// here, and handed to the services at construction time. Nothing below this
// layer reads env vars.

use std::collections::HashMap;
use std::time::Duration;

use chrono_tz::Tz;

/// Experience/leveling tunables.
#[derive(Debug, Clone)]
pub struct LevelingConfig {
    /// XP granted per qualifying message.
    pub xp_per_message: u64,
    /// Minimum time between two awards for the same user.
    pub cooldown: Duration,
    /// Linear threshold multiplier: level L starts at `L * level_multiplier` XP.
    pub level_multiplier: u64,
    /// Level -> role name granted when that level is reached.
    pub level_roles: HashMap<u32, String>,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            xp_per_message: 15,
            cooldown: Duration::from_secs(60),
            level_multiplier: 100,
            level_roles: HashMap::new(),
        }
    }
}

/// Where notices get routed.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Fixed monitor/admin channel id, preferred when set.
    pub monitor_channel_id: Option<u64>,
    /// Fallback: first text channel with this name.
    pub monitor_channel_name: String,
}

/// Ticket system settings. Absent entirely when the gist backing store is not
/// configured.
#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub github_token: String,
    pub gist_id: String,
    pub gist_filename: String,
    /// Category the per-ticket channels are created under.
    pub category_id: Option<u64>,
    pub channel_prefix: String,
    pub max_open_per_user: usize,
    /// How long a closed ticket channel stays visible before deletion.
    pub close_delay: Duration,
}

/// Account-link settings. Absent when the document store is not configured.
#[derive(Debug, Clone)]
pub struct LinkingConfig {
    pub project_id: String,
    pub tokens_collection: String,
    pub links_collection: String,
    /// Document holding the reward mailbox recipient list.
    pub mailbox_document: String,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub data_dir: String,
    pub leveling: LevelingConfig,
    pub routing: RoutingConfig,
    pub tickets: Option<TicketConfig>,
    pub linking: Option<LinkingConfig>,
    /// Timezone used when rendering timestamps in embeds.
    pub display_timezone: Tz,
    /// Upper bound applied to every remote HTTP call.
    pub remote_timeout: Duration,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let discord_token = std::env::var("DISCORD_TOKEN")
            .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?;

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());

        let leveling = LevelingConfig {
            xp_per_message: env_parse("XP_PER_MESSAGE", 15),
            cooldown: Duration::from_secs(env_parse("XP_COOLDOWN_SECS", 60)),
            level_multiplier: env_parse("LEVEL_MULTIPLIER", 100),
            level_roles: parse_level_roles(
                &std::env::var("LEVEL_ROLES").unwrap_or_default(),
            )?,
        };

        let routing = RoutingConfig {
            monitor_channel_id: std::env::var("MONITOR_CHANNEL_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
            monitor_channel_name: std::env::var("MONITOR_CHANNEL_NAME")
                .unwrap_or_else(|_| "bot-logs".to_string()),
        };

        let tickets = match (
            std::env::var("GITHUB_TOKEN").ok(),
            std::env::var("GIST_ID").ok(),
        ) {
            (Some(github_token), Some(gist_id)) => Some(TicketConfig {
                github_token,
                gist_id,
                gist_filename: std::env::var("GIST_FILENAME")
                    .unwrap_or_else(|_| "community-tickets.json".to_string()),
                category_id: std::env::var("TICKET_CATEGORY_ID")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                channel_prefix: std::env::var("TICKET_CHANNEL_PREFIX")
                    .unwrap_or_else(|_| "ticket-".to_string()),
                max_open_per_user: env_parse("MAX_TICKETS_PER_USER", 3),
                close_delay: Duration::from_secs(env_parse("TICKET_CLOSE_DELAY_SECS", 5)),
            }),
            _ => None,
        };

        let linking = std::env::var("FIRESTORE_PROJECT_ID")
            .ok()
            .map(|project_id| LinkingConfig {
                project_id,
                tokens_collection: std::env::var("LINK_TOKENS_COLLECTION")
                    .unwrap_or_else(|_| "link_tokens".to_string()),
                links_collection: std::env::var("LINK_RECORDS_COLLECTION")
                    .unwrap_or_else(|_| "account_links".to_string()),
                mailbox_document: std::env::var("LINK_MAILBOX_DOCUMENT")
                    .unwrap_or_else(|_| "mailboxes/link_rewards".to_string()),
            });

        let display_timezone: Tz = std::env::var("DISPLAY_TIMEZONE")
            .unwrap_or_else(|_| "Asia/Taipei".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("DISPLAY_TIMEZONE is not a valid timezone: {}", e))?;

        Ok(Self {
            discord_token,
            data_dir,
            leveling,
            routing,
            tickets,
            linking,
            display_timezone,
            remote_timeout: Duration::from_secs(env_parse("REMOTE_TIMEOUT_SECS", 10)),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse the `LEVEL_ROLES` table, e.g. `"5:Active Member,10:Veteran,20:Core"`.
fn parse_level_roles(raw: &str) -> anyhow::Result<HashMap<u32, String>> {
    let mut roles = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (level, role) = entry
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("LEVEL_ROLES entry missing ':': {}", entry))?;
        let level: u32 = level
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("LEVEL_ROLES level is not a number: {}", entry))?;
        roles.insert(level, role.trim().to_string());
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_roles_table() {
        let roles = parse_level_roles("5:Active Member, 10:Veteran,20:Core").unwrap();
        assert_eq!(roles.len(), 3);
        assert_eq!(roles.get(&5).map(String::as_str), Some("Active Member"));
        assert_eq!(roles.get(&10).map(String::as_str), Some("Veteran"));
        assert_eq!(roles.get(&20).map(String::as_str), Some("Core"));
    }

    #[test]
    fn empty_level_roles_is_empty() {
        assert!(parse_level_roles("").unwrap().is_empty());
    }

    #[test]
    fn malformed_level_roles_entry_is_an_error() {
        assert!(parse_level_roles("five-Active").is_err());
        assert!(parse_level_roles("x:Role").is_err());
    }
}
