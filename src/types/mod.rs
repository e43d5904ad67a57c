// src/types/mod.rs - Core message and verdict types that flow through the bot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user as reported by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Case-preserved username, without the leading `@`.
    pub username: Option<String>,
}

impl UserRef {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }

    /// Inline mention link understood by Telegram-style HTML rendering.
    pub fn mention_html(&self) -> String {
        format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            self.id,
            html_escape(&self.display_name())
        )
    }
}

/// Denormalized user cache entry, upserted on every sighting.
/// Last write wins on username/name fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    /// Case-preserved; the lookup key is its lowercase form.
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl UserProfile {
    pub fn from_user(user: &UserRef) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            last_seen: Utc::now(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// Platform-supplied mention entity that already carries a numeric identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMention {
    pub user: UserRef,
    /// Char offset into the message text, used only for ordering.
    pub offset: usize,
}

/// Incoming chat message in platform-agnostic form.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: UserRef,
    /// Message text or media caption.
    pub text: String,
    pub reply_to: Option<UserRef>,
    /// Resolved mention entities, in text order.
    pub mentions: Vec<ResolvedMention>,
    pub is_private: bool,
    pub timestamp: DateTime<Utc>,
}

/// A candidate recipient extracted from a message.
///
/// A target without a numeric id is unresolved: it carries only a username
/// and the provisional display name `@username`. It may later be upgraded by
/// a deferred platform lookup, or stay untargetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user_id: Option<i64>,
    pub display_name: String,
    pub username: Option<String>,
}

impl Target {
    pub fn from_user(user: &UserRef) -> Self {
        Self {
            user_id: Some(user.id),
            display_name: user.display_name(),
            username: user.username.clone(),
        }
    }

    pub fn unresolved(username: &str) -> Self {
        Self {
            user_id: None,
            display_name: format!("@{}", username),
            username: Some(username.to_string()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.user_id.is_some()
    }
}

/// What the engine wants done with a group message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    /// Leave the message alone.
    None,
    /// Delete the message and post the substitute notice in its place.
    DeleteAndNotify { notice: String },
    /// The message was a moderation command; post the result text.
    CommandResult { text: String },
}

/// Enforcement verdict for a sender/target pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Suppress {
        /// Notice text after the personal/global -> autoresponder -> default fallback.
        notice: String,
        /// Display name of the user whose block fired.
        blocker: String,
    },
}

/// Recognized moderation command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    None,
    Stop,
    StopAll,
    List,
    ListMine,
    Top,
}

/// Output of the command interpreter. The payload is raw: lines after the
/// keyword line, before username/whitespace sanitizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub payload: Option<String>,
}

impl ParsedCommand {
    pub fn none() -> Self {
        Self {
            kind: CommandKind::None,
            payload: None,
        }
    }
}

/// Errors surfaced by chat platform adapters.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("user not found on platform")]
    NotFound,
    #[error("platform request timed out")]
    Timeout,
    #[error("platform api error: {0}")]
    Api(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not connected")]
    NotConnected,
}

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage conflict: {0}")]
    Conflict(String),
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Minimal HTML escaping for user-controlled names inside notices.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_joins_first_and_last() {
        let user = UserRef {
            id: 1,
            first_name: "Анна".to_string(),
            last_name: Some("Петрова".to_string()),
            username: None,
        };
        assert_eq!(user.display_name(), "Анна Петрова");
    }

    #[test]
    fn mention_html_escapes_name() {
        let user = UserRef {
            id: 7,
            first_name: "<b>".to_string(),
            last_name: None,
            username: None,
        };
        assert_eq!(
            user.mention_html(),
            "<a href=\"tg://user?id=7\">&lt;b&gt;</a>"
        );
    }

    #[test]
    fn unresolved_target_carries_provisional_name() {
        let target = Target::unresolved("somebody");
        assert!(!target.is_resolved());
        assert_eq!(target.display_name, "@somebody");
        assert_eq!(target.username.as_deref(), Some("somebody"));
    }
}
