use super::{TokenError, TokenManager};
use crate::console::{markup, ConsoleSession};
use tracing::debug;

impl TokenManager {
    /// Listed bots count as available, otherwise the console decides
    pub(super) async fn check_in(
        &self,
        session: &ConsoleSession,
        username: &str,
    ) -> Result<bool, TokenError> {
        let html = session.bot_list().await?;
        let bare = username.trim_start_matches('@');
        if let Some(bot) = markup::find_bot_id(&html, Some(bare)) {
            debug!("@{bare} is already listed as bot {bot}");
            return Ok(true);
        }
        Ok(session.check_username(username).await?)
    }
}
