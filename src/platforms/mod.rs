// src/platforms/mod.rs - Chat platform adapter interface

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{IncomingMessage, PlatformError, UserProfile};

pub mod telegram;

/// Trait every chat platform adapter implements.
///
/// Adapters push incoming messages into a broadcast channel; the engine
/// consumes the receiver. State is interior so a connected adapter can be
/// shared as `Arc<dyn ChatPlatform>` across tasks.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Connect and start feeding the message channel.
    async fn connect(&self) -> Result<()>;

    /// Platform identifier (e.g. "telegram").
    fn platform_name(&self) -> &str;

    async fn is_connected(&self) -> bool;

    /// Receiver for incoming messages; None before `connect`.
    fn message_receiver(&self) -> Option<broadcast::Receiver<IncomingMessage>>;

    /// Post plain text; returns the new message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError>;

    /// Post a notice with inline-mention markup; returns the new message id.
    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;

    /// Look a user up by public username. `PlatformError::NotFound` covers
    /// both unknown usernames and accounts that cannot be messaged directly.
    async fn fetch_user_by_username(&self, username: &str) -> Result<UserProfile, PlatformError>;

    /// Stop polling and drop the message channel.
    async fn disconnect(&self) -> Result<()>;
}
