use super::{TokenError, TokenManager};
use crate::console::{markup, ConsoleSession};
use crate::storage;
use std::sync::Arc;
use tracing::{error, info};

impl TokenManager {
    /// Finds the companion bot in the bot list and caches its token
    pub(super) async fn discover(
        self: &Arc<Self>,
        session: &ConsoleSession,
        create_new_if_needed: bool,
        revoke_token: bool,
    ) -> Result<bool, TokenError> {
        let custom = storage::custom_bot(self.store.as_ref());
        self.discover_named(session, custom.as_deref(), create_new_if_needed, revoke_token)
            .await
    }

    /// Discovery constrained to `username` (without `@`), or to any
    /// generated companion bot when `None`
    pub(super) async fn discover_named(
        self: &Arc<Self>,
        session: &ConsoleSession,
        username: Option<&str>,
        create_new_if_needed: bool,
        revoke_token: bool,
    ) -> Result<bool, TokenError> {
        if self.token().is_some() {
            return Ok(true);
        }

        info!("Bot token not found in the store, searching the console");
        let html = session.bot_list().await?;

        let Some(bot) = markup::find_bot_id(&html, username) else {
            if create_new_if_needed {
                return self.create_in(session).await;
            }
            info!("No companion bot listed");
            return Ok(false);
        };

        let token = if revoke_token {
            session.revoke_token(&bot).await?
        } else {
            session.bot_token(&bot).await?
        };
        self.set_token(Some(token))?;
        info!("Token of bot {bot} saved");

        if let Err(e) = session
            .enable_inline(&bot, &self.settings.inline_placeholder)
            .await
        {
            error!("Inline mode was not enabled for bot {bot}: {e}");
            return Err(e.into());
        }
        Ok(true)
    }
}
