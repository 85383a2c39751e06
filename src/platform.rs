//! Chat platform seam
//!
//! The token manager needs two things from the user's chat session: a web
//! view URL for the bot-management console and a way to tell whether a
//! username is already taken. The MTProto client that provides them lives
//! outside this crate and plugs in through [`ChatPlatform`].

use crate::config::Settings;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors reported by the chat platform client
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform refused or failed the request
    #[error("Platform request failed: {0}")]
    Request(String),
    /// No web view URL is available
    #[error("No console web view available: {0}")]
    NoWebView(String),
}

/// Parameters of a web view request against the administrative bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebViewRequest {
    /// Chat the web view is opened in
    pub peer: String,
    /// Bot serving the web app
    pub bot: String,
    /// Client platform reported to the server
    pub platform: String,
    /// Web app address
    pub url: String,
    /// Whether the request originates from the bot menu button
    pub from_bot_menu: bool,
}

impl WebViewRequest {
    /// Request for the bot-management console described by `settings`
    #[must_use]
    pub fn console(settings: &Settings) -> Self {
        Self {
            peer: settings.admin_bot.clone(),
            bot: settings.admin_bot.clone(),
            platform: settings.webview_platform.clone(),
            url: settings.console_url.clone(),
            from_bot_menu: false,
        }
    }
}

/// The user's chat session, as far as the token manager is concerned
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Opens a web view and returns its URL, auth payload included
    async fn request_web_view(&self, request: WebViewRequest) -> Result<String, PlatformError>;

    /// Whether `username` resolves to an existing entity
    async fn username_taken(&self, username: &str) -> Result<bool, PlatformError>;
}

/// Platform stand-in serving a web view URL obtained out of band
///
/// Used when the binary runs without a user session attached. It cannot
/// resolve usernames, so every username is reported as free and the console
/// has the final word through `checkBotUsername`.
#[derive(Debug, Clone)]
pub struct StaticWebView {
    url: String,
}

impl StaticWebView {
    /// Wraps a pre-obtained web view URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChatPlatform for StaticWebView {
    async fn request_web_view(&self, request: WebViewRequest) -> Result<String, PlatformError> {
        debug!(
            "Serving static web view for {} instead of requesting one",
            request.bot
        );
        if self.url.contains("tgWebAppData=") {
            Ok(self.url.clone())
        } else {
            Err(PlatformError::NoWebView(
                "configured URL carries no tgWebAppData".to_string(),
            ))
        }
    }

    async fn username_taken(&self, _username: &str) -> Result<bool, PlatformError> {
        Ok(false)
    }
}
