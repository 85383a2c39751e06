//! Bot-management console client
//!
//! The console is an undocumented web app served to the administrative bot's
//! users. This module splits it into three layers:
//! - [`markup`]: the only place that knows the console's HTML/JSON shapes
//! - [`transport`]: the cookie-carrying HTTP session
//! - [`session`]: authenticated console API calls built on both

pub mod markup;
pub mod session;
pub mod transport;

pub use markup::BotId;
pub use session::{BotRegistration, ConsoleSession};
pub use transport::{
    ConsoleTransport, HttpReply, HttpTransport, HttpTransportFactory, MediaUpload,
    RequestProfile, TransportError, TransportFactory,
};

use thiserror::Error;

/// Errors raised while talking to the console
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// The console could not be reached or authenticated against
    #[error("Console web app is not available: {0}")]
    Unavailable(String),
    /// The console answered with a non-200 status or `ok: false`
    #[error("Console rejected {action}: {reason}")]
    Rejected {
        /// Console step that failed
        action: &'static str,
        /// Status code or reply excerpt
        reason: String,
    },
    /// An expected pattern or field was absent
    #[error("Unexpected console markup: missing {0}")]
    Parse(&'static str),
    /// A reply that should have been JSON was not
    #[error("Unexpected console reply: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Every offered username was refused
    #[error("No free bot username after {0} attempts")]
    UsernamesExhausted(usize),
    /// The HTTP layer failed outside of session bootstrap
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConsoleError {
    /// Creates a `Rejected` error for a non-200 reply
    #[must_use]
    pub fn status(action: &'static str, status: u16) -> Self {
        Self::Rejected {
            action,
            reason: format!("HTTP {status}"),
        }
    }

    /// Whether the error came from the network rather than from the console
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
