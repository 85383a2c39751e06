//! Bot API token newtype.

// lazy_regex! statics rely on once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::fmt;
use thiserror::Error;

static RE_FULL_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^\d+:[A-Za-z0-9\-_]{35}$");

/// Value that does not look like a bot token
#[derive(Debug, Error)]
#[error("malformed bot token ({0} chars)")]
pub struct InvalidToken(usize);

/// Companion bot API token, `<bot id>:<35 chars>`
///
/// `Debug` and `Display` mask the secret part so tokens never end up in logs
/// by accident; use [`Token::as_str`] where the raw value is required.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Validates `raw` against the token shape
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if `raw` is not a well-formed token.
    pub fn parse(raw: &str) -> Result<Self, InvalidToken> {
        let raw = raw.trim();
        if RE_FULL_TOKEN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidToken(raw.chars().count()))
        }
    }

    /// Wraps a value already matched by the token pattern
    pub(crate) fn new_unchecked(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// Raw token value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric bot id the token belongs to
    #[must_use]
    pub fn bot_id(&self) -> Option<u64> {
        self.0.split_once(':')?.0.parse().ok()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token")
            .field(&crate::utils::mask_token(&self.0))
            .finish()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::utils::mask_token(&self.0))
    }
}
