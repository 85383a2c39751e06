//! Inline companion bot runtime
//!
//! Once a token is asserted the companion bot starts long-polling for
//! updates. The runtime reports polling conflicts (another process polling
//! with the same token) back to the token manager, which revokes the token and
//! acquires a fresh one.

/// teloxide-backed long-polling runtime
pub mod poller;

pub use poller::TeloxidePoller;

use crate::manager::Token;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Another `getUpdates` consumer took over the token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConflict;

/// Identity of the running companion bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    /// Bot user id
    pub id: u64,
    /// Bot username, without `@`
    pub username: String,
}

/// Errors raised while starting the companion bot
#[derive(Debug, Error)]
pub enum ServeError {
    /// The platform does not accept the token
    #[error("Bot token was rejected")]
    InvalidToken,
    /// Any other Bot API failure
    #[error("Bot API error: {0}")]
    Api(String),
}

/// Serving loop of the companion bot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InlineServer: Send + Sync {
    /// Validates `token` and starts serving; conflicts are sent to `conflicts`
    async fn start(
        &self,
        token: Token,
        conflicts: UnboundedSender<PollingConflict>,
    ) -> Result<BotIdentity, ServeError>;

    /// Stops serving, a no-op when not running
    async fn stop(&self);
}
