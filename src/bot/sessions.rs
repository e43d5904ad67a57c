// src/bot/sessions.rs - Private-chat conversational session states

use std::collections::HashMap;
use tokio::sync::RwLock;

/// What the bot is waiting for in a private chat. States are mutually
/// exclusive; setting a new one replaces whatever was there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingAutoresponderText,
    AwaitingSupportText,
    AwaitingAdminReply { recipient: i64 },
}

/// Per-private-chat session store with an unconditional cancel transition
/// reachable from every state.
pub struct SessionTracker {
    sessions: RwLock<HashMap<i64, SessionState>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set(&self, chat_id: i64, state: SessionState) {
        self.sessions.write().await.insert(chat_id, state);
    }

    pub async fn current(&self, chat_id: i64) -> Option<SessionState> {
        self.sessions.read().await.get(&chat_id).cloned()
    }

    /// Remove and return the state, leaving the chat idle.
    pub async fn take(&self, chat_id: i64) -> Option<SessionState> {
        self.sessions.write().await.remove(&chat_id)
    }

    /// Cancel from any state. Returns whether something was pending.
    pub async fn cancel(&self, chat_id: i64) -> bool {
        self.sessions.write().await.remove(&chat_id).is_some()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_clears_every_state() {
        let tracker = SessionTracker::new();
        let states = [
            SessionState::AwaitingAutoresponderText,
            SessionState::AwaitingSupportText,
            SessionState::AwaitingAdminReply { recipient: 42 },
        ];
        for state in states {
            tracker.set(7, state).await;
            assert!(tracker.cancel(7).await);
            assert_eq!(tracker.current(7).await, None);
        }
        // Cancel with nothing pending is a no-op.
        assert!(!tracker.cancel(7).await);
    }

    #[tokio::test]
    async fn setting_a_state_replaces_the_previous_one() {
        let tracker = SessionTracker::new();
        tracker.set(7, SessionState::AwaitingSupportText).await;
        tracker.set(7, SessionState::AwaitingAutoresponderText).await;
        assert_eq!(
            tracker.current(7).await,
            Some(SessionState::AwaitingAutoresponderText)
        );
    }

    #[tokio::test]
    async fn sessions_are_scoped_per_chat() {
        let tracker = SessionTracker::new();
        tracker.set(1, SessionState::AwaitingSupportText).await;
        assert_eq!(tracker.current(2).await, None);
        assert_eq!(
            tracker.take(1).await,
            Some(SessionState::AwaitingSupportText)
        );
        assert_eq!(tracker.current(1).await, None);
    }
}
