//! Source code for Link Guard Bot, a Telegram bot that checks links
//! against VirusTotal.

/// Process configuration.
pub mod settings;

/// Error type of update handlers.
pub mod error;

/// The database.
pub mod database;

/// Daily quota bookkeeping.
pub mod usage;

/// VirusTotal client.
pub mod reputation;

/// Everything the bot says, and the keyboards it says it with.
pub mod presenter;

/// URL checking workflow for incoming messages.
pub mod workflow;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
