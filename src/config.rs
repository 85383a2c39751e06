//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the console constants the token manager relies on.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Key-value namespace holding all inline bot state
pub const STORE_NAMESPACE: &str = "heroku.inline";
/// Store key of the persisted bot token
pub const TOKEN_KEY: &str = "bot_token";
/// Store key of the user-chosen companion bot username
pub const CUSTOM_BOT_KEY: &str = "custom_bot";

/// Administrative account serving the bot-management console
pub const ADMIN_BOT: &str = "@botfather";
/// Web app address requested from the chat platform
pub const CONSOLE_WEBAPP_URL: &str = "https://webappinternal.telegram.org/botfather?";
/// Referer expected by the console on every request
pub const CONSOLE_REFERER: &str = "https://webappinternal.telegram.org/botfather";

/// Console bot titles are cut to this many characters
pub const BOT_TITLE_MAX_CHARS: usize = 64;

/// Application settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Pre-obtained console web view URL, used when no user session is wired in
    pub webview_url: Option<String>,
    /// Web app URL requested from the chat platform
    pub console_url: String,
    /// Peer and bot the web view is requested from
    pub admin_bot: String,
    /// Platform reported in the web view request
    pub webview_platform: String,

    /// How many times the console session bootstrap is attempted
    pub bootstrap_attempts: usize,
    /// Fixed delay before each bootstrap attempt
    pub bootstrap_delay_ms: u64,
    /// How many usernames are offered to `checkBotUsername` before giving up
    pub username_attempts: usize,

    /// Image uploaded as the companion bot's userpic
    pub avatar_path: PathBuf,
    /// Version string embedded into the bot title
    pub version: String,
    /// Placeholder shown in the inline query input
    pub inline_placeholder: String,

    /// JSON document backing the key-value store
    pub store_path: PathBuf,
    /// Timeout for a single console HTTP request
    pub http_timeout_secs: u64,
    /// Minimum spacing between mutating console calls
    pub flood_wait_interval_ms: u64,
    /// Long-polling timeout of the inline bot
    pub poll_timeout_secs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webview_url: None,
            console_url: CONSOLE_WEBAPP_URL.to_string(),
            admin_bot: ADMIN_BOT.to_string(),
            webview_platform: "android".to_string(),
            bootstrap_attempts: 5,
            bootstrap_delay_ms: 1500,
            username_attempts: 5,
            avatar_path: PathBuf::from("assets/heroku.png"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            inline_placeholder: "user@heroku:~$".to_string(),
            store_path: PathBuf::from("config/inline_store.json"),
            http_timeout_secs: 60,
            flood_wait_interval_ms: 1000,
            poll_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Create new settings by loading from files and environment
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, never checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__BOOTSTRAP_ATTEMPTS=3 ./target/companion-bot`
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Eg.. `COMPANION_INLINE_PLACEHOLDER=root@box ./target/companion-bot`
            .add_source(
                Environment::with_prefix("COMPANION")
                    .prefix_separator("_")
                    .try_parsing(true)
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Title the companion bot is registered with
    #[must_use]
    pub fn bot_title(&self) -> String {
        crate::utils::truncate_str(format!("🪐 Heroku {}", self.version), BOT_TITLE_MAX_CHARS)
    }

    /// Delay awaited before every bootstrap attempt
    #[must_use]
    pub const fn bootstrap_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_delay_ms)
    }

    /// Per-request console timeout
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Minimum interval enforced by flood-wait protection
    #[must_use]
    pub const fn flood_wait_interval(&self) -> Duration {
        Duration::from_millis(self.flood_wait_interval_ms)
    }
}
