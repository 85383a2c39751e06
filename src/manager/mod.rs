//! Companion bot token lifecycle
//!
//! [`TokenManager`] keeps the inline bot's API token valid: it finds the
//! companion bot in the bot-management console (or registers one), reads or
//! revokes its token, persists it and restarts the serving loop whenever
//! another process steals the token.
//!
//! Every request that reaches the console runs inside a freshly bootstrapped
//! [`ConsoleSession`] which is closed on every exit path.

mod check;
mod creation;
mod discovery;
mod recovery;
pub mod token;
pub mod username;

#[cfg(test)]
mod tests;

pub use token::{InvalidToken, Token};

use crate::bot::{InlineServer, PollingConflict, ServeError};
use crate::config::Settings;
use crate::console::{ConsoleError, ConsoleSession, TransportFactory};
use crate::flood::FloodGuard;
use crate::platform::{ChatPlatform, PlatformError, WebViewRequest};
use crate::storage::{self, SettingsStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Boxed operation future, lets lifecycle operations call each other and be
/// spawned as detached tasks
pub type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<bool, TokenError>> + Send + 'a>>;

/// Failures that escape a token operation
///
/// Console rejections and unexpected markup are reported as `Ok(false)`;
/// only local state and network failures surface here.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Network failure after the session was established
    #[error(transparent)]
    Console(#[from] ConsoleError),
    /// The token or preference could not be persisted
    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),
    /// The chat platform failed
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Operations dispatched through [`TokenManager::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRequest {
    /// Make sure a token is cached, finding or creating the bot as needed
    Assert {
        /// Register a bot when none is listed
        create_new_if_needed: bool,
        /// Revoke the token of a found bot instead of reading it
        revoke_token: bool,
    },
    /// Register a new companion bot
    Create,
    /// Drop the current token after a polling conflict and acquire a new one
    Revoke {
        /// Whether the serving loop is running
        already_initialised: bool,
    },
    /// Revoke and re-acquire the token, then restart serving
    Reassert,
    /// Whether `username` is listed or free
    Check {
        /// Username to look up
        username: String,
    },
}

impl TokenRequest {
    const fn name(&self) -> &'static str {
        match self {
            Self::Assert { .. } => "assert",
            Self::Create => "create",
            Self::Revoke { .. } => "revoke",
            Self::Reassert => "reassert",
            Self::Check { .. } => "check",
        }
    }
}

/// Outcome of starting the serving loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The bot is serving updates
    Serving,
    /// The platform rejected the cached token
    InvalidToken,
    /// No token, or the loop could not be started
    Failed,
}

/// Collaborators of a [`TokenManager`]
pub struct ManagerDeps {
    /// Runtime settings
    pub settings: Settings,
    /// The user's chat session
    pub platform: Arc<dyn ChatPlatform>,
    /// Opens console transports
    pub transports: Arc<dyn TransportFactory>,
    /// Persistent key-value store
    pub store: Arc<dyn SettingsStore>,
    /// Shared rate limiter for mutating console calls
    pub flood: Arc<dyn FloodGuard>,
    /// Serving loop of the companion bot
    pub server: Arc<dyn InlineServer>,
}

/// Keeps the companion bot token valid
pub struct TokenManager {
    settings: Settings,
    platform: Arc<dyn ChatPlatform>,
    transports: Arc<dyn TransportFactory>,
    store: Arc<dyn SettingsStore>,
    flood: Arc<dyn FloodGuard>,
    server: Arc<dyn InlineServer>,
    token: RwLock<Option<Token>>,
    init_complete: AtomicBool,
}

/// Turns console rejections into a logged `false`, keeps everything else
fn settle(action: &str, result: Result<bool, TokenError>) -> Result<bool, TokenError> {
    match result {
        Err(TokenError::Console(e)) if !e.is_transport() => {
            error!("Token {action} failed: {e}");
            Ok(false)
        }
        other => other,
    }
}

impl TokenManager {
    /// Creates a manager, loading the token persisted by a previous run
    #[must_use]
    pub fn new(deps: ManagerDeps) -> Arc<Self> {
        let token = storage::stored_token(deps.store.as_ref());
        Arc::new(Self {
            settings: deps.settings,
            platform: deps.platform,
            transports: deps.transports,
            store: deps.store,
            flood: deps.flood,
            server: deps.server,
            token: RwLock::new(token),
            init_complete: AtomicBool::new(false),
        })
    }

    /// Current token, if any
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the serving loop was started with a valid token
    #[must_use]
    pub fn init_complete(&self) -> bool {
        self.init_complete.load(Ordering::SeqCst)
    }

    /// Runtime settings
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replaces the token in the store and the cache together
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store write fails; the cache is left as is.
    pub fn set_token(&self, token: Option<Token>) -> Result<(), StoreError> {
        let mut cached = self.token.write().unwrap_or_else(PoisonError::into_inner);
        storage::save_token(self.store.as_ref(), token.as_ref())?;
        *cached = token;
        Ok(())
    }

    fn mark_incomplete(&self) {
        self.init_complete.store(false, Ordering::SeqCst);
    }

    /// Runs `request` inside a fresh console session
    ///
    /// An `Assert` with a cached token returns `true` without any I/O.
    /// A console that cannot be reached yields `Ok(false)`.
    pub fn handle(self: &Arc<Self>, request: TokenRequest) -> BoxedResult<'_> {
        Box::pin(async move {
            if matches!(request, TokenRequest::Assert { .. }) && self.token().is_some() {
                return Ok(true);
            }

            let url = match self
                .platform
                .request_web_view(WebViewRequest::console(&self.settings))
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    if request == TokenRequest::Reassert {
                        self.mark_incomplete();
                    }
                    return Err(e.into());
                }
            };
            let session = match ConsoleSession::bootstrap(
                self.transports.as_ref(),
                Arc::clone(&self.flood),
                &url,
                self.settings.bootstrap_attempts,
                self.settings.bootstrap_delay(),
            )
            .await
            {
                Ok(session) => session,
                Err(e) => {
                    error!("Cannot run token {}: {e}", request.name());
                    if request == TokenRequest::Reassert {
                        self.mark_incomplete();
                    }
                    return Ok(false);
                }
            };

            let action = request.name();
            let result = match request {
                TokenRequest::Assert {
                    create_new_if_needed,
                    revoke_token,
                } => self.discover(&session, create_new_if_needed, revoke_token).await,
                TokenRequest::Create => self.create_in(&session).await,
                TokenRequest::Revoke {
                    already_initialised,
                } => self.revoke_in(&session, already_initialised).await,
                TokenRequest::Reassert => self.reassert_in(&session).await,
                TokenRequest::Check { username } => self.check_in(&session, &username).await,
            };
            session.close().await;
            settle(action, result)
        })
    }

    /// Makes sure a token is cached
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on store, platform or network failures.
    pub async fn assert_token(
        self: &Arc<Self>,
        create_new_if_needed: bool,
        revoke_token: bool,
    ) -> Result<bool, TokenError> {
        self.handle(TokenRequest::Assert {
            create_new_if_needed,
            revoke_token,
        })
        .await
    }

    /// Registers a new companion bot and caches its token
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on store, platform or network failures.
    pub async fn create_bot(self: &Arc<Self>) -> Result<bool, TokenError> {
        self.handle(TokenRequest::Create).await
    }

    /// Drops the token after a polling conflict and acquires a fresh one
    ///
    /// With `already_initialised` the reassertion runs detached and `true`
    /// only means it was scheduled.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on store, platform or network failures.
    pub async fn dp_revoke_token(
        self: &Arc<Self>,
        already_initialised: bool,
    ) -> Result<bool, TokenError> {
        self.handle(TokenRequest::Revoke {
            already_initialised,
        })
        .await
    }

    /// Revokes and re-acquires the token, then restarts serving
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on store, platform or network failures.
    pub async fn reassert_token(self: &Arc<Self>) -> Result<bool, TokenError> {
        self.handle(TokenRequest::Reassert).await
    }

    /// Whether `username` is one of the account's bots or is free to register
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on platform or network failures.
    pub async fn check_bot(self: &Arc<Self>, username: &str) -> Result<bool, TokenError> {
        self.handle(TokenRequest::Check {
            username: username.to_string(),
        })
        .await
    }

    /// Asserts a token and starts serving
    ///
    /// A token the platform rejects is dropped and asserted once more.
    /// Returns whether inline features are available.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` on store, platform or network failures.
    pub async fn init(self: &Arc<Self>) -> Result<bool, TokenError> {
        if !self.assert_token(true, false).await? {
            warn!("No companion bot token, inline features are disabled");
            self.mark_incomplete();
            return Ok(false);
        }

        match self.register().await {
            Registration::Serving => Ok(true),
            Registration::InvalidToken => {
                warn!("Companion bot token was rejected, asserting a new one");
                self.set_token(None)?;
                let serving = self.assert_token(true, false).await?
                    && self.register().await == Registration::Serving;
                if !serving {
                    warn!("Inline features are disabled");
                }
                Ok(serving)
            }
            Registration::Failed => Ok(false),
        }
    }

    /// Starts the serving loop with the cached token
    ///
    /// A polling conflict reported by the loop triggers
    /// [`TokenManager::dp_revoke_token`].
    pub async fn register(self: &Arc<Self>) -> Registration {
        let Some(token) = self.token() else {
            self.mark_incomplete();
            return Registration::Failed;
        };

        let (conflicts_tx, mut conflicts_rx) = mpsc::unbounded_channel::<PollingConflict>();
        match self.server.start(token, conflicts_tx).await {
            Ok(identity) => {
                info!("Companion bot @{} is ready", identity.username);
                self.init_complete.store(true, Ordering::SeqCst);
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    if conflicts_rx.recv().await.is_some() {
                        if let Err(e) = manager.dp_revoke_token(true).await {
                            error!("Token revocation after polling conflict failed: {e}");
                        }
                    }
                });
                Registration::Serving
            }
            Err(ServeError::InvalidToken) => {
                self.mark_incomplete();
                Registration::InvalidToken
            }
            Err(e) => {
                error!("Cannot start the companion bot: {e}");
                self.mark_incomplete();
                Registration::Failed
            }
        }
    }

    /// Stops serving
    pub async fn stop(&self) {
        self.server.stop().await;
        self.mark_incomplete();
    }
}
