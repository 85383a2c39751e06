//! Authenticated console session.
//!
//! A session is bootstrapped from a web view URL: the embedded auth payload is
//! posted to the console, which sets session cookies, and the landing page
//! yields the anti-CSRF hash every API call must carry. Sessions live for one
//! token-management operation and must be closed afterwards.

use crate::console::markup::{self, BotId, WebViewAuth};
use crate::console::transport::{
    ConsoleTransport, HttpReply, MediaUpload, RequestProfile, TransportError, TransportFactory,
};
use crate::console::ConsoleError;
use crate::flood::FloodGuard;
use crate::manager::Token;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, error, info};

/// Longest reply excerpt kept in error messages
const REPLY_EXCERPT_CHARS: usize = 200;

/// Why the best-effort userpic upload did not produce a media id
#[derive(Debug, Error)]
pub enum AvatarError {
    /// The bundled image could not be read
    #[error("cannot read userpic asset: {0}")]
    Asset(#[from] std::io::Error),
    /// The console answered with a non-200 status
    #[error("upload rejected with HTTP {0}")]
    Rejected(u16),
    /// The reply did not carry `media.photo_id`
    #[error("upload reply carries no media id")]
    MissingMediaId,
    /// The HTTP layer failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fields of a `createBot` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotRegistration {
    /// Display name
    pub title: String,
    /// Username, including the leading `@`
    pub username: String,
    /// Bio
    pub about: String,
    /// Media id of the userpic, empty for none
    pub userpic: String,
}

/// An authenticated console session
pub struct ConsoleSession {
    transport: Arc<dyn ConsoleTransport>,
    flood: Arc<dyn FloodGuard>,
    base_url: String,
    hash: String,
}

fn form(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn excerpt(reply: &HttpReply) -> String {
    crate::utils::truncate_str(&reply.body, REPLY_EXCERPT_CHARS)
}

impl ConsoleSession {
    /// Bootstraps a session, retrying while the console is unavailable.
    ///
    /// `delay` is awaited before every attempt: freshly requested web views
    /// often need a moment before the console accepts them. Each attempt
    /// opens its own transport.
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Parse` if the URL carries no auth payload and
    /// `ConsoleError::Unavailable` once all attempts have failed.
    pub async fn bootstrap(
        factory: &dyn TransportFactory,
        flood: Arc<dyn FloodGuard>,
        webview_url: &str,
        attempts: usize,
        delay: Duration,
    ) -> Result<Self, ConsoleError> {
        let auth = markup::parse_webview_url(webview_url)?;
        let auth = &auth;
        let strategy = FixedInterval::new(delay).take(attempts.saturating_sub(1));

        tokio::time::sleep(delay).await;
        let mut attempt = 0_usize;
        Retry::spawn(strategy, || {
            attempt += 1;
            let current = attempt;
            let flood = Arc::clone(&flood);
            async move {
                let result = Self::open(factory, flood, auth).await;
                if let Err(e) = &result {
                    debug!("Console bootstrap attempt {current}/{attempts} failed: {e}");
                }
                result
            }
        })
        .await
        .map_err(|e| {
            error!("Console web app is not available now: {e}");
            ConsoleError::Unavailable(e.to_string())
        })
    }

    /// Single bootstrap attempt; the transport is closed again on failure.
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError` if authentication or hash extraction fails.
    pub async fn open(
        factory: &dyn TransportFactory,
        flood: Arc<dyn FloodGuard>,
        auth: &WebViewAuth,
    ) -> Result<Self, ConsoleError> {
        let transport = factory.open(&auth.base_url)?;
        match Self::authenticate(transport.as_ref(), auth).await {
            Ok(hash) => Ok(Self {
                transport,
                flood,
                base_url: auth.base_url.clone(),
                hash,
            }),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn authenticate(
        transport: &dyn ConsoleTransport,
        auth: &WebViewAuth,
    ) -> Result<String, ConsoleError> {
        let reply = transport
            .post_form(
                &format!("{}/api?hash=-", auth.base_url),
                form(&[("_auth", auth.auth_data.as_str()), ("method", "auth")]),
            )
            .await?;
        if !reply.is_success() {
            error!(
                "Error while getting cookies to enter the console: HTTP {}",
                reply.status
            );
            return Err(ConsoleError::status("auth", reply.status));
        }

        let landing = transport
            .get(&auth.base_url, RequestProfile::Standard)
            .await?;
        if !landing.is_success() {
            error!("Error while getting the session hash: HTTP {}", landing.status);
            return Err(ConsoleError::status("landing page", landing.status));
        }
        markup::extract_session_hash(&landing.body)
    }

    /// Anti-CSRF hash of this session
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Console address without query
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self) -> String {
        format!("{}/api?hash={}", self.base_url, self.hash)
    }

    async fn call(&self, fields: Vec<(String, String)>) -> Result<HttpReply, ConsoleError> {
        Ok(self.transport.post_form(&self.api_url(), fields).await?)
    }

    /// HTML of the console page listing the account's bots
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Rejected` on a non-200 reply.
    pub async fn bot_list(&self) -> Result<String, ConsoleError> {
        let reply = self
            .transport
            .get(&self.base_url, RequestProfile::Standard)
            .await?;
        if !reply.is_success() {
            return Err(ConsoleError::status("bot list", reply.status));
        }
        Ok(reply.body)
    }

    /// Asks the console whether a bot may be registered under `username`
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Rejected` on a non-200 reply.
    pub async fn check_username(&self, username: &str) -> Result<bool, ConsoleError> {
        self.flood.protect().await;
        let reply = self
            .call(form(&[("username", username), ("method", "checkBotUsername")]))
            .await?;
        if !reply.is_success() {
            return Err(ConsoleError::status("checkBotUsername", reply.status));
        }
        Ok(markup::is_ok(&reply.json()?))
    }

    /// Uploads a bot userpic and returns its media id
    ///
    /// # Errors
    ///
    /// Returns `AvatarError` for any failure; callers treat it as best-effort.
    pub async fn upload_userpic(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AvatarError> {
        let upload = MediaUpload {
            field: "file".to_string(),
            file_name: file_name.to_string(),
            content_type: "image/png".to_string(),
            bytes,
            fields: form(&[("method", "uploadMedia"), ("target", "bot_userpic")]),
        };

        self.flood.protect().await;
        let reply = self
            .transport
            .post_multipart(&self.api_url(), upload)
            .await?;
        if !reply.is_success() {
            return Err(AvatarError::Rejected(reply.status));
        }
        reply
            .json()
            .ok()
            .as_ref()
            .and_then(markup::photo_id)
            .ok_or(AvatarError::MissingMediaId)
    }

    /// Registers a new bot
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Rejected` on a non-200 reply or `ok: false`,
    /// which usually means a ban or the per-account bot limit.
    pub async fn create_bot(&self, bot: &BotRegistration) -> Result<(), ConsoleError> {
        self.flood.protect().await;
        let reply = self
            .call(form(&[
                ("title", bot.title.as_str()),
                ("username", bot.username.as_str()),
                ("about", bot.about.as_str()),
                ("userpic", bot.userpic.as_str()),
                ("method", "createBot"),
            ]))
            .await?;
        if !reply.is_success() {
            return Err(ConsoleError::status("createBot", reply.status));
        }
        if !markup::is_ok(&reply.json()?) {
            return Err(ConsoleError::Rejected {
                action: "createBot",
                reason: format!("banned or bot limit exceeded: {}", excerpt(&reply)),
            });
        }
        info!("Bot {} registered", bot.username);
        Ok(())
    }

    /// Revokes the bot's token and returns the freshly issued one
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError` on a non-200 reply or when no token comes back.
    pub async fn revoke_token(&self, bot: &BotId) -> Result<Token, ConsoleError> {
        self.flood.protect().await;
        let reply = self
            .call(form(&[("bid", bot.0.as_str()), ("method", "revokeAccessToken")]))
            .await?;
        if !reply.is_success() {
            return Err(ConsoleError::status("revokeAccessToken", reply.status));
        }
        markup::token_from_revoke(&reply.json()?)
    }

    /// Reads the current token from the bot's detail fragment
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError` on a non-200 reply or when no token is embedded.
    pub async fn bot_token(&self, bot: &BotId) -> Result<Token, ConsoleError> {
        let reply = self
            .transport
            .get(
                &format!("{}/bot/{}", self.base_url, bot.0),
                RequestProfile::WebApp,
            )
            .await?;
        if !reply.is_success() {
            return Err(ConsoleError::status("bot details", reply.status));
        }
        markup::token_from_details(&reply.json()?)
    }

    /// Changes one bot setting, `setting` is the bare name (`inline`, `inph`, ...)
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Rejected` on a non-200 reply.
    pub async fn change_setting(
        &self,
        bot: &BotId,
        setting: &str,
        value: &str,
    ) -> Result<(), ConsoleError> {
        self.flood.protect().await;
        let key = format!("settings[{setting}]");
        let reply = self
            .call(form(&[
                (key.as_str(), value),
                ("bid", bot.0.as_str()),
                ("method", "changeSettings"),
            ]))
            .await?;
        if !reply.is_success() {
            error!(
                "Error while changing bot inline settings: HTTP {}",
                reply.status
            );
            return Err(ConsoleError::status("changeSettings", reply.status));
        }
        Ok(())
    }

    /// Turns on inline mode with `placeholder` and inline feedback
    ///
    /// # Errors
    ///
    /// Returns the first failing `changeSettings` call's error.
    pub async fn enable_inline(&self, bot: &BotId, placeholder: &str) -> Result<(), ConsoleError> {
        for (setting, value) in [("inline", "true"), ("inph", placeholder), ("infdb", "1")] {
            self.change_setting(bot, setting, value).await?;
        }
        Ok(())
    }

    /// Releases the underlying transport
    pub async fn close(self) {
        self.transport.close().await;
    }
}
