//! Channel implementations for various messaging platforms.
//!
//! This module provides concrete implementations of the [`Channel`] trait
//! for different messaging platforms.
//!
//! # Available Channels
//!
//! - [`cli::CliChannel`] - Command-line interface channel (always available)
//! - [`telegram::TelegramChannel`] - Telegram bot (requires `telegram` feature)
//! - [`discord::DiscordChannel`] - Discord bot (requires `discord` feature)
//!
//! # Feature Flags
//!
//! - `telegram` - Enable Telegram support via teloxide
//! - `discord` - Enable Discord support via serenity

pub mod cli;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use cli::CliChannel;

#[cfg(feature = "discord")]
pub use discord::DiscordChannel;

#[cfg(feature = "telegram")]
pub use telegram::TelegramChannel;
