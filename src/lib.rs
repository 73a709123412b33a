#![deny(missing_docs)]
//! vidrelay: a Telegram bot that relays YouTube, TikTok and Instagram
//! videos back to the user, staying reachable through a rotating set of
//! proxied and direct network paths.

/// Telegram transport, messaging, routing and progress reporting.
pub mod bot;
/// Configuration management.
pub mod config;
/// Media acquisition: platforms, extraction, transcoding, temp files.
pub mod media;
/// Per-request pipeline orchestration.
pub mod pipeline;
/// Startup and serving loop.
pub mod runner;
/// Usage statistics storage (SQLite).
pub mod storage;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;
