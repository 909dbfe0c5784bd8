use std::{fs, time::Duration};

use bot_commons::env_nonempty;

/// How many URLs a user can check per day for free.
pub const DAILY_FREE_CHECKS: i64 = 5;

/// Extra daily checks per invited friend. Zero means referrals don't
/// raise the limit, and the bot doesn't advertise that they do.
pub const REFERRAL_BONUS_PER_FRIEND: i64 = 0;

/// How many URLs from one message get checked. The rest are ignored.
pub const MAX_URLS_PER_MESSAGE: usize = 3;

/// How many of the latest checks the stats screen lists.
pub const RECENT_CHECKS_SHOWN: u32 = 3;

/// Pause after sending each verdict, to not flood the chat.
pub const PAUSE_BETWEEN_URLS: Duration = Duration::from_secs(1);

/// What `.env.example` files ship with. Treated the same as no key at all.
pub const PLACEHOLDER_API_KEY: &str = "your_virustotal_api_key_here";

pub const DEFAULT_DATABASE_URL: &str = "sqlite:bot_database.sqlite";
pub const DEFAULT_VIRUSTOTAL_API_URL: &str = "https://www.virustotal.com/api/v3";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no bot token: set BOT_TOKEN or put it into the \"{key_file}\" file ({source})")]
    MissingBotToken {
        key_file: &'static str,
        source: std::io::Error,
    },
}

/// Everything the bot reads from its environment on startup.
#[derive(Clone)]
pub struct Settings {
    pub bot_token: String,
    /// [`None`] if unset or left as [`PLACEHOLDER_API_KEY`].
    pub virustotal_api_key: Option<String>,
    pub virustotal_api_url: String,
    pub database_url: String,
}

impl Settings {
    /// Read settings from environment variables:
    ///
    /// * `BOT_TOKEN`, or else contents of the `key` file
    ///   (`key_debug` in debug builds);
    /// * `VIRUSTOTAL_API_KEY`, optional;
    /// * `VIRUSTOTAL_API_URL`, optional;
    /// * `DATABASE_URL`, optional.
    ///
    /// # Errors
    /// Errors if there's no bot token anywhere.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = match env_nonempty("BOT_TOKEN") {
            Some(token) => token,
            None => {
                let key_file = match cfg!(debug_assertions) {
                    true => "key_debug",
                    false => "key",
                };
                fs::read_to_string(key_file)
                    .map(|key| key.trim().to_string())
                    .map_err(|source| ConfigError::MissingBotToken { key_file, source })?
            }
        };

        Ok(Settings {
            bot_token,
            virustotal_api_key: usable_api_key(env_nonempty("VIRUSTOTAL_API_KEY")),
            virustotal_api_url: env_nonempty("VIRUSTOTAL_API_URL")
                .unwrap_or_else(|| DEFAULT_VIRUSTOTAL_API_URL.to_string()),
            database_url: env_nonempty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        })
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bot_token", &"<hidden>")
            .field(
                "virustotal_api_key",
                &self.virustotal_api_key.as_ref().map(|_| "<hidden>"),
            )
            .field("virustotal_api_url", &self.virustotal_api_url)
            .field("database_url", &self.database_url)
            .finish()
    }
}

/// Filter out the placeholder API key.
fn usable_api_key(key: Option<String>) -> Option<String> {
    key.filter(|key| key != PLACEHOLDER_API_KEY)
}
