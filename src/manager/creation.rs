use super::{username, BoxedResult, TokenError, TokenManager};
use crate::console::session::AvatarError;
use crate::console::{BotRegistration, ConsoleError, ConsoleSession};
use crate::storage;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// File name the userpic is uploaded under
const USERPIC_FILE_NAME: &str = "heroku.png";

impl TokenManager {
    /// Registers a companion bot, then discovers it to cache the token
    ///
    /// Boxed because creation and discovery call each other.
    pub(super) fn create_in<'a>(self: &'a Arc<Self>, session: &'a ConsoleSession) -> BoxedResult<'a> {
        Box::pin(async move {
            info!("No companion bot found, creating a new one");

            let username = match self.negotiate_username(session).await {
                Err(TokenError::Console(e @ ConsoleError::UsernamesExhausted(_))) => {
                    error!("{e}");
                    return Ok(false);
                }
                other => other?,
            };

            let userpic = match self.upload_userpic(session).await {
                Ok(media_id) => media_id,
                Err(e) => {
                    warn!("Companion bot gets no userpic: {e}");
                    String::new()
                }
            };

            let registration = BotRegistration {
                title: self.settings.bot_title(),
                username,
                about: String::new(),
                userpic,
            };
            session.create_bot(&registration).await?;

            // Look for the name actually registered, a taken custom name was replaced
            let registered = registration.username.trim_start_matches('@');
            self.discover_named(session, Some(registered), false, false)
                .await
        })
    }

    /// First username to offer: the custom preference unless it is taken
    async fn initial_username(&self) -> Result<String, TokenError> {
        let Some(custom) = storage::custom_bot(self.store.as_ref()) else {
            return Ok(username::generate());
        };
        let custom = format!("@{custom}");
        if self.platform.username_taken(&custom).await? {
            info!("Custom bot username {custom} is taken, generating one");
            Ok(username::generate())
        } else {
            Ok(custom)
        }
    }

    /// Offers usernames to `checkBotUsername` until one is accepted
    async fn negotiate_username(&self, session: &ConsoleSession) -> Result<String, TokenError> {
        let attempts = self.settings.username_attempts;
        let mut candidate = self.initial_username().await?;

        for attempt in 1..=attempts {
            if session.check_username(&candidate).await? {
                return Ok(candidate);
            }
            debug!("Username {candidate} refused ({attempt}/{attempts})");
            candidate = username::generate();
        }
        Err(ConsoleError::UsernamesExhausted(attempts).into())
    }

    async fn upload_userpic(&self, session: &ConsoleSession) -> Result<String, AvatarError> {
        let bytes = tokio::fs::read(&self.settings.avatar_path).await?;
        session.upload_userpic(USERPIC_FILE_NAME, bytes).await
    }
}
