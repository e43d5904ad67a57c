// src/storage/mod.rs - Storage interface for all persistent bot state

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{StorageError, UserProfile};

pub mod memory;

pub use memory::MemoryStorage;

pub type Result<T> = std::result::Result<T, StorageError>;

/// One personal block row. Present means blocked; the toggle operation
/// creates and destroys rows. Unique per (chat, blocker, blocked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalBlock {
    pub chat_id: i64,
    pub blocker_id: i64,
    pub blocked_id: i64,
    /// Free text shown to the blocked party; absent falls back to the
    /// blocker's global autoresponder.
    pub notice: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// "Block everyone in this chat" row, at most one per (chat, blocker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBlock {
    pub chat_id: i64,
    pub blocker_id: i64,
    pub notice: Option<String>,
    pub enabled_at: DateTime<Utc>,
}

/// A support request persisted for operator review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportMessage {
    pub user_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent state behind the engine: blocks, exceptions, autoresponders,
/// swear counters, the user profile cache, and support requests.
///
/// Toggle operations are atomic read-modify-write: two concurrent toggles of
/// the same row must serialize, never both observing "absent". Backends
/// guarantee this with a per-store lock or equivalent transaction semantics.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Flip the personal block for (chat, blocker, blocked).
    /// Returns true when the row now exists (blocked), false when removed.
    /// `notice` is stored only when the toggle creates the row.
    async fn toggle_personal_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        blocked_id: i64,
        notice: Option<String>,
    ) -> Result<bool>;

    async fn personal_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        blocked_id: i64,
    ) -> Result<Option<PersonalBlock>>;

    /// All personal blocks in a chat, for the list command.
    async fn chat_personal_blocks(&self, chat_id: i64) -> Result<Vec<PersonalBlock>>;

    /// Personal blocks held by one blocker in a chat.
    async fn personal_blocks_by(&self, chat_id: i64, blocker_id: i64)
        -> Result<Vec<PersonalBlock>>;

    /// Flip the block-everyone flag for (chat, blocker). Turning it ON starts
    /// a new episode: all prior exceptions for the pair are cleared.
    async fn toggle_global_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        notice: Option<String>,
    ) -> Result<bool>;

    async fn global_block(&self, chat_id: i64, blocker_id: i64) -> Result<Option<GlobalBlock>>;

    /// Flip whether `allowed_id` is exempt from (chat, blocker)'s global
    /// block. Toggling does not require the block to be active.
    async fn toggle_exception(&self, chat_id: i64, blocker_id: i64, allowed_id: i64)
        -> Result<bool>;

    async fn is_excepted(&self, chat_id: i64, blocker_id: i64, allowed_id: i64) -> Result<bool>;

    async fn exceptions(&self, chat_id: i64, blocker_id: i64) -> Result<Vec<i64>>;

    /// Chat-independent default notice for a user, one row per user.
    async fn set_autoresponder(&self, user_id: i64, text: String) -> Result<()>;

    async fn autoresponder(&self, user_id: i64) -> Result<Option<String>>;

    /// Accumulate vocabulary hits for (chat, user). Never decreases.
    async fn add_swears(&self, chat_id: i64, user_id: i64, count: u64) -> Result<()>;

    /// Raw (user, count) pairs for a chat, unordered.
    async fn swear_counts(&self, chat_id: i64) -> Result<Vec<(i64, u64)>>;

    /// Last-write-wins upsert; the lowercased-username slot moves to this
    /// user even if another profile held it.
    async fn upsert_profile(&self, profile: UserProfile) -> Result<()>;

    async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>>;

    /// Lookup by username, case-insensitive.
    async fn profile_by_username(&self, username: &str) -> Result<Option<UserProfile>>;

    async fn save_support_message(&self, user_id: i64, text: String) -> Result<()>;

    /// Support anti-spam gate. Returns the remaining cooldown in seconds, or
    /// None when the user may post now (in which case the timestamp is taken).
    async fn throttle_support(&self, user_id: i64, cooldown_secs: u64) -> Result<Option<u64>>;

    /// Write state out to the configured snapshot, if any.
    async fn persist(&self) -> Result<()>;
}
