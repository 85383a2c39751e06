use super::{settle, Registration, TokenError, TokenManager};
use crate::console::ConsoleSession;
use std::sync::Arc;
use tracing::{error, info};

impl TokenManager {
    /// Clears the token; reasserts detached when serving, inline otherwise
    pub(super) async fn revoke_in(
        self: &Arc<Self>,
        session: &ConsoleSession,
        already_initialised: bool,
    ) -> Result<bool, TokenError> {
        if already_initialised {
            self.stop().await;
            error!("Got polling conflict, attempting token revocation");
        }

        self.set_token(None)?;

        if already_initialised {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                match manager.reassert_token().await {
                    Ok(true) => info!("Companion bot token reasserted"),
                    Ok(false) => error!("Companion bot token could not be reasserted"),
                    Err(e) => error!("Token reassertion failed: {e}"),
                }
            });
            return Ok(true);
        }
        self.reassert_in(session).await
    }

    /// Acquires a fresh token by revocation and restarts serving
    pub(super) async fn reassert_in(
        self: &Arc<Self>,
        session: &ConsoleSession,
    ) -> Result<bool, TokenError> {
        let asserted = match settle("reassert", self.discover(session, true, true).await) {
            Ok(asserted) => asserted,
            Err(e) => {
                self.mark_incomplete();
                return Err(e);
            }
        };
        if asserted && self.register().await == Registration::Serving {
            return Ok(true);
        }
        self.mark_incomplete();
        Ok(false)
    }
}
