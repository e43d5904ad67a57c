//! # Hushbot
//!
//! A group-chat moderation bot that lets any member shut down replies to
//! their messages: personal per-user blocks, a chat-wide "stop all" mode
//! with per-user exceptions, configurable autoresponder notices, and a
//! swear-word leaderboard sharing the same message-scanning pass.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hushbot::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Arc::new(SettingsManager::load("hushbot.yaml".as_ref()).await?);
//!     let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
//!     let bot = Arc::new(GuardBot::new(Arc::clone(&settings), storage, None).await);
//!
//!     let platform = Arc::new(TelegramConnection::new(TelegramConfig::from_env()?));
//!     bot.start(platform).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bot.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::GuardBot;
    pub use crate::config::{Settings, SettingsManager};
    pub use crate::platforms::{
        telegram::{TelegramConfig, TelegramConnection},
        ChatPlatform,
    };
    pub use crate::storage::{MemoryStorage, Storage};
    pub use crate::types::{IncomingMessage, MessageAction, Target, Verdict};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
