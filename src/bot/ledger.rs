// src/bot/ledger.rs - Per-chat swear counters and leaderboard

use log::{debug, warn};
use std::sync::Arc;

use crate::storage::Storage;

/// Accumulates lexicon hits per (chat, user) and ranks them.
pub struct SwearLedger {
    storage: Arc<dyn Storage>,
}

impl SwearLedger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Add `hits` to the counter. A message with three flagged tokens adds 3.
    pub async fn record(&self, chat_id: i64, user_id: i64, hits: u64) {
        if hits == 0 {
            return;
        }
        debug!(
            "Recording {} swear hit(s) for user {} in chat {}",
            hits, user_id, chat_id
        );
        if let Err(e) = self.storage.add_swears(chat_id, user_id, hits).await {
            warn!("Failed to record swear hits: {}", e);
        }
    }

    /// Top `n` by count descending; ties break by ascending user id so the
    /// ordering is deterministic.
    pub async fn top(&self, chat_id: i64, n: usize) -> Vec<(i64, u64)> {
        let mut counts = match self.storage.swear_counts(chat_id).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Failed to read swear counters: {}", e);
                return Vec::new();
            }
        };
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }

    /// User-facing leaderboard with names from the profile cache.
    pub async fn leaderboard_text(&self, chat_id: i64, n: usize) -> String {
        let top = self.top(chat_id, n).await;
        if top.is_empty() {
            return "📊 В этом чате пока никто не ругался.".to_string();
        }
        let mut lines = Vec::with_capacity(top.len());
        for (place, (user_id, count)) in top.iter().enumerate() {
            let name = match self.storage.profile(*user_id).await {
                Ok(Some(profile)) => profile.display_name(),
                _ => format!("ID{}", user_id),
            };
            lines.push(format!("{}. {} — {}", place + 1, name, count));
        }
        format!("📊 Топ сквернословов этого чата:\n\n{}", lines.join("\n"))
    }
}
