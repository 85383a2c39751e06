//! Console markup adapter.
//!
//! Every assumption about the console's HTML and JSON shapes lives here, so a
//! markup change on the console side touches only this module. Patterns are
//! declared with `lazy_regex!` and validated at compile time.

// lazy_regex! statics rely on once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::console::ConsoleError;
use crate::manager::Token;
use lazy_regex::lazy_regex;
use regex::Regex;
use serde_json::Value;

/// Session hash embedded into the landing page: `Main.init('<18 hex>');`
static RE_SESSION_HASH: lazy_regex::Lazy<Regex> = lazy_regex!(r"Main\.init\('([0-9a-f]{18})'\);");

/// Bot API token shape
static RE_TOKEN: lazy_regex::Lazy<Regex> = lazy_regex!(r"(\d+:[A-Za-z0-9\-_]{35})");

/// Username shape of generated companion bots
pub const GENERATED_USERNAME_PATTERN: &str = r"\w*_[0-9a-zA-Z]{6}_bot";

/// Bot-list row, `{}` is replaced by a username regex
const BOT_ROW_TEMPLATE: &str = concat!(
    r#"<a class="tm-row tm-row-link" href="/botfather/bot/(\d+)">"#,
    r#"(?:<img class="tm-row-pic tm-row-pic-user" src="https://cdn4\.telesco\.pe/file/[A-Za-z0-9_-]+\.jpg">)?"#,
    r#"<div> <div class="tm-row-value">([^<]*)</div>"#,
    r#"<div class="tm-row-description">@{}</div> </div></a>"#,
);

/// Console-internal id of a bot, as found in the bot list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotId(pub String);

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials carried by a console web view URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebViewAuth {
    /// Console address without query or fragment
    pub base_url: String,
    /// Percent-decoded `tgWebAppData` payload
    pub auth_data: String,
}

/// Splits a web view URL into the console base URL and its auth payload.
///
/// # Errors
///
/// Returns `ConsoleError::Parse` when the URL carries no `tgWebAppData`.
pub fn parse_webview_url(url: &str) -> Result<WebViewAuth, ConsoleError> {
    let (_, tail) = url
        .split_once("tgWebAppData=")
        .ok_or(ConsoleError::Parse("tgWebAppData in web view URL"))?;
    let raw = tail.split("&tgWebAppVersion").next().unwrap_or(tail);
    let auth_data = urlencoding::decode(raw)
        .map_err(|_| ConsoleError::Parse("tgWebAppData encoding"))?
        .into_owned();
    let base_url = url.split('?').next().unwrap_or(url).to_string();

    Ok(WebViewAuth {
        base_url,
        auth_data,
    })
}

/// Extracts the 18-hex-char session hash from the console landing page.
///
/// # Errors
///
/// Returns `ConsoleError::Parse` if the `Main.init` call is absent.
pub fn extract_session_hash(html: &str) -> Result<String, ConsoleError> {
    RE_SESSION_HASH
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ConsoleError::Parse("session hash"))
}

/// Finds the console id of a listed bot.
///
/// With `username` set only that exact bot matches, otherwise the first bot
/// with a generated companion username is taken.
#[must_use]
pub fn find_bot_id(html: &str, username: Option<&str>) -> Option<BotId> {
    let name_pattern = username.map_or_else(|| GENERATED_USERNAME_PATTERN.to_string(), regex::escape);
    let re = Regex::new(&BOT_ROW_TEMPLATE.replace("{}", &name_pattern)).ok()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| BotId(m.as_str().to_string()))
}

/// Returns the first token-shaped substring of `text`.
#[must_use]
pub fn find_token(text: &str) -> Option<Token> {
    RE_TOKEN
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| Token::new_unchecked(m.as_str()))
}

/// Token from the bot detail fragment (`{"h": "<html with token>"}`).
///
/// # Errors
///
/// Returns `ConsoleError::Parse` if `h` is missing or holds no token.
pub fn token_from_details(body: &Value) -> Result<Token, ConsoleError> {
    let blob = body
        .get("h")
        .and_then(Value::as_str)
        .ok_or(ConsoleError::Parse("bot details `h` field"))?;
    find_token(blob).ok_or(ConsoleError::Parse("token in bot details"))
}

/// Token returned by `revokeAccessToken`.
///
/// # Errors
///
/// Returns `ConsoleError::Parse` if the `token` field is missing or malformed.
pub fn token_from_revoke(body: &Value) -> Result<Token, ConsoleError> {
    body.get("token")
        .and_then(Value::as_str)
        .and_then(|raw| Token::parse(raw).ok())
        .ok_or(ConsoleError::Parse("revoked token"))
}

/// Media id returned by `uploadMedia`.
#[must_use]
pub fn photo_id(body: &Value) -> Option<String> {
    let id = body.get("media")?.get("photo_id")?;
    match id {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `ok` flag of an API reply, absent counts as `false`.
#[must_use]
pub fn is_ok(body: &Value) -> bool {
    body.get("ok").and_then(Value::as_bool).unwrap_or(false)
}
