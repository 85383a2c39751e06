#![deny(missing_docs)]
//! Companion bot library.
//!
//! Provisions the userbot's inline companion bot through the bot-management
//! console and keeps its API token valid.

/// Inline bot serving loop.
pub mod bot;
/// Configuration management.
pub mod config;
/// Bot-management console client.
pub mod console;
/// Flood-wait protection.
pub mod flood;
/// Token lifecycle.
pub mod manager;
/// Chat platform seam.
pub mod platform;
/// Key-value settings store.
pub mod storage;
/// Utility functions.
pub mod utils;

#[cfg(test)]
mod test_support;
