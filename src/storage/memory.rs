// src/storage/memory.rs - In-memory storage backend with JSON snapshots

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{GlobalBlock, PersonalBlock, Result, Storage, SupportMessage};
use crate::types::UserProfile;

#[derive(Debug, Default)]
struct MemoryState {
    personal: HashMap<(i64, i64, i64), PersonalBlock>,
    global: HashMap<(i64, i64), GlobalBlock>,
    exceptions: HashMap<(i64, i64), BTreeSet<i64>>,
    autoresponders: HashMap<i64, String>,
    swears: HashMap<(i64, i64), u64>,
    profiles: HashMap<i64, UserProfile>,
    /// Lowercased username -> user id. Last upsert wins.
    usernames: HashMap<String, i64>,
    support_log: Vec<SupportMessage>,
    support_seen: HashMap<i64, chrono::DateTime<Utc>>,
}

/// Flat snapshot format written to disk. Maps keyed by tuples do not survive
/// JSON, so rows are stored as plain lists and re-indexed on load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    personal_blocks: Vec<PersonalBlock>,
    global_blocks: Vec<GlobalBlock>,
    exceptions: Vec<ExceptionRow>,
    autoresponders: Vec<AutoresponderRow>,
    swear_counters: Vec<SwearRow>,
    profiles: Vec<UserProfile>,
    support_log: Vec<SupportMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExceptionRow {
    chat_id: i64,
    blocker_id: i64,
    allowed_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AutoresponderRow {
    user_id: i64,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SwearRow {
    chat_id: i64,
    user_id: i64,
    count: u64,
}

/// Storage backend keeping everything under one RwLock. Every toggle runs
/// its whole read-decide-write under a single write guard, so concurrent
/// toggles in the same chat serialize and cannot both observe "absent".
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot(path: PathBuf) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            snapshot_path: Some(path),
        }
    }

    /// Load state from the snapshot file, if configured and present.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !path.exists() {
            info!("No storage snapshot at {}, starting empty", path.display());
            return Ok(());
        }
        let raw = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        let mut state = self.state.write().await;
        *state = MemoryState::default();
        for block in snapshot.personal_blocks {
            state
                .personal
                .insert((block.chat_id, block.blocker_id, block.blocked_id), block);
        }
        for block in snapshot.global_blocks {
            state.global.insert((block.chat_id, block.blocker_id), block);
        }
        for row in snapshot.exceptions {
            state
                .exceptions
                .entry((row.chat_id, row.blocker_id))
                .or_default()
                .insert(row.allowed_id);
        }
        for row in snapshot.autoresponders {
            state.autoresponders.insert(row.user_id, row.message);
        }
        for row in snapshot.swear_counters {
            state.swears.insert((row.chat_id, row.user_id), row.count);
        }
        for profile in snapshot.profiles {
            if let Some(username) = &profile.username {
                state.usernames.insert(username.to_lowercase(), profile.user_id);
            }
            state.profiles.insert(profile.user_id, profile);
        }
        state.support_log = snapshot.support_log;
        info!(
            "Loaded storage snapshot: {} personal blocks, {} global blocks, {} profiles",
            state.personal.len(),
            state.global.len(),
            state.profiles.len()
        );
        Ok(())
    }

    fn build_snapshot(state: &MemoryState) -> Snapshot {
        Snapshot {
            personal_blocks: state.personal.values().cloned().collect(),
            global_blocks: state.global.values().cloned().collect(),
            exceptions: state
                .exceptions
                .iter()
                .flat_map(|(&(chat_id, blocker_id), allowed)| {
                    allowed.iter().map(move |&allowed_id| ExceptionRow {
                        chat_id,
                        blocker_id,
                        allowed_id,
                    })
                })
                .collect(),
            autoresponders: state
                .autoresponders
                .iter()
                .map(|(&user_id, message)| AutoresponderRow {
                    user_id,
                    message: message.clone(),
                })
                .collect(),
            swear_counters: state
                .swears
                .iter()
                .map(|(&(chat_id, user_id), &count)| SwearRow {
                    chat_id,
                    user_id,
                    count,
                })
                .collect(),
            profiles: state.profiles.values().cloned().collect(),
            support_log: state.support_log.clone(),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn toggle_personal_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        blocked_id: i64,
        notice: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (chat_id, blocker_id, blocked_id);
        if state.personal.remove(&key).is_some() {
            debug!("Removed personal block {:?}", key);
            Ok(false)
        } else {
            state.personal.insert(
                key,
                PersonalBlock {
                    chat_id,
                    blocker_id,
                    blocked_id,
                    notice,
                    created_at: Utc::now(),
                },
            );
            debug!("Inserted personal block {:?}", key);
            Ok(true)
        }
    }

    async fn personal_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        blocked_id: i64,
    ) -> Result<Option<PersonalBlock>> {
        let state = self.state.read().await;
        Ok(state.personal.get(&(chat_id, blocker_id, blocked_id)).cloned())
    }

    async fn chat_personal_blocks(&self, chat_id: i64) -> Result<Vec<PersonalBlock>> {
        let state = self.state.read().await;
        let mut blocks: Vec<PersonalBlock> = state
            .personal
            .values()
            .filter(|b| b.chat_id == chat_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.blocker_id, b.blocked_id));
        Ok(blocks)
    }

    async fn personal_blocks_by(
        &self,
        chat_id: i64,
        blocker_id: i64,
    ) -> Result<Vec<PersonalBlock>> {
        let state = self.state.read().await;
        let mut blocks: Vec<PersonalBlock> = state
            .personal
            .values()
            .filter(|b| b.chat_id == chat_id && b.blocker_id == blocker_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.blocked_id);
        Ok(blocks)
    }

    async fn toggle_global_block(
        &self,
        chat_id: i64,
        blocker_id: i64,
        notice: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let key = (chat_id, blocker_id);
        if state.global.remove(&key).is_some() {
            debug!("Removed global block {:?}", key);
            Ok(false)
        } else {
            // New episode: exceptions from a prior episode must not carry over.
            state.exceptions.remove(&key);
            state.global.insert(
                key,
                GlobalBlock {
                    chat_id,
                    blocker_id,
                    notice,
                    enabled_at: Utc::now(),
                },
            );
            debug!("Inserted global block {:?}", key);
            Ok(true)
        }
    }

    async fn global_block(&self, chat_id: i64, blocker_id: i64) -> Result<Option<GlobalBlock>> {
        let state = self.state.read().await;
        Ok(state.global.get(&(chat_id, blocker_id)).cloned())
    }

    async fn toggle_exception(
        &self,
        chat_id: i64,
        blocker_id: i64,
        allowed_id: i64,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let set = state.exceptions.entry((chat_id, blocker_id)).or_default();
        if set.remove(&allowed_id) {
            Ok(false)
        } else {
            set.insert(allowed_id);
            Ok(true)
        }
    }

    async fn is_excepted(&self, chat_id: i64, blocker_id: i64, allowed_id: i64) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .exceptions
            .get(&(chat_id, blocker_id))
            .map(|set| set.contains(&allowed_id))
            .unwrap_or(false))
    }

    async fn exceptions(&self, chat_id: i64, blocker_id: i64) -> Result<Vec<i64>> {
        let state = self.state.read().await;
        Ok(state
            .exceptions
            .get(&(chat_id, blocker_id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn set_autoresponder(&self, user_id: i64, text: String) -> Result<()> {
        let mut state = self.state.write().await;
        state.autoresponders.insert(user_id, text);
        Ok(())
    }

    async fn autoresponder(&self, user_id: i64) -> Result<Option<String>> {
        let state = self.state.read().await;
        Ok(state.autoresponders.get(&user_id).cloned())
    }

    async fn add_swears(&self, chat_id: i64, user_id: i64, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut state = self.state.write().await;
        *state.swears.entry((chat_id, user_id)).or_insert(0) += count;
        Ok(())
    }

    async fn swear_counts(&self, chat_id: i64) -> Result<Vec<(i64, u64)>> {
        let state = self.state.read().await;
        Ok(state
            .swears
            .iter()
            .filter(|((chat, _), _)| *chat == chat_id)
            .map(|(&(_, user_id), &count)| (user_id, count))
            .collect())
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let new_slot = profile.username.as_ref().map(|u| u.to_lowercase());
        // Release the old username slot if this user renamed and still owns it.
        if let Some(previous) = state.profiles.get(&profile.user_id) {
            if let Some(old_name) = previous.username.as_ref().map(|u| u.to_lowercase()) {
                if new_slot.as_deref() != Some(old_name.as_str())
                    && state.usernames.get(&old_name) == Some(&profile.user_id)
                {
                    state.usernames.remove(&old_name);
                }
            }
        }
        if let Some(slot) = new_slot {
            state.usernames.insert(slot, profile.user_id);
        }
        state.profiles.insert(profile.user_id, profile);
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let state = self.state.read().await;
        Ok(state.profiles.get(&user_id).cloned())
    }

    async fn profile_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let state = self.state.read().await;
        let Some(user_id) = state.usernames.get(&username.to_lowercase()) else {
            return Ok(None);
        };
        Ok(state.profiles.get(user_id).cloned())
    }

    async fn save_support_message(&self, user_id: i64, text: String) -> Result<()> {
        let mut state = self.state.write().await;
        state.support_log.push(SupportMessage {
            user_id,
            text,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn throttle_support(&self, user_id: i64, cooldown_secs: u64) -> Result<Option<u64>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        if let Some(last) = state.support_seen.get(&user_id) {
            let elapsed = now.signed_duration_since(*last).num_seconds().max(0) as u64;
            if elapsed < cooldown_secs {
                return Ok(Some(cooldown_secs - elapsed));
            }
        }
        state.support_seen.insert(user_id, now);
        Ok(None)
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = {
            let state = self.state.read().await;
            Self::build_snapshot(&state)
        };
        let raw = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if let Err(e) = tokio::fs::write(path, raw).await {
            warn!("Failed to write storage snapshot to {}: {}", path.display(), e);
            return Err(e.into());
        }
        debug!("Wrote storage snapshot to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn profile(id: i64, username: &str, first: &str) -> UserProfile {
        UserProfile {
            user_id: id,
            username: Some(username.to_string()),
            first_name: first.to_string(),
            last_name: None,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn personal_toggle_is_an_involution() {
        let store = MemoryStorage::new();
        assert!(store
            .toggle_personal_block(1, 10, 20, Some("ушёл".into()))
            .await
            .unwrap());
        let block = store.personal_block(1, 10, 20).await.unwrap().unwrap();
        assert_eq!(block.notice.as_deref(), Some("ушёл"));

        assert!(!store.toggle_personal_block(1, 10, 20, None).await.unwrap());
        assert!(store.personal_block(1, 10, 20).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enabling_global_block_clears_prior_exceptions() {
        let store = MemoryStorage::new();
        assert!(store.toggle_exception(1, 10, 30).await.unwrap());
        assert!(store.toggle_exception(1, 10, 40).await.unwrap());
        assert_eq!(store.exceptions(1, 10).await.unwrap(), vec![30, 40]);

        assert!(store.toggle_global_block(1, 10, None).await.unwrap());
        assert!(store.exceptions(1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabling_global_block_keeps_personal_blocks() {
        let store = MemoryStorage::new();
        store
            .toggle_personal_block(1, 10, 20, None)
            .await
            .unwrap();
        store.toggle_global_block(1, 10, None).await.unwrap();
        assert!(!store.toggle_global_block(1, 10, None).await.unwrap());
        assert!(store.personal_block(1, 10, 20).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn username_slot_moves_to_most_recent_claimant() {
        let store = MemoryStorage::new();
        store.upsert_profile(profile(1, "Shared", "Первый")).await.unwrap();
        store.upsert_profile(profile(2, "shared", "Второй")).await.unwrap();

        let found = store.profile_by_username("SHARED").await.unwrap().unwrap();
        assert_eq!(found.user_id, 2);
    }

    #[tokio::test]
    async fn renamed_user_releases_old_username_slot() {
        let store = MemoryStorage::new();
        store.upsert_profile(profile(1, "before", "Лена")).await.unwrap();
        store.upsert_profile(profile(1, "after", "Лена")).await.unwrap();

        assert!(store.profile_by_username("before").await.unwrap().is_none());
        assert_eq!(
            store
                .profile_by_username("after")
                .await
                .unwrap()
                .unwrap()
                .user_id,
            1
        );
    }

    #[tokio::test]
    async fn swear_counters_accumulate_per_chat() {
        let store = MemoryStorage::new();
        store.add_swears(1, 10, 3).await.unwrap();
        store.add_swears(1, 10, 2).await.unwrap();
        store.add_swears(2, 10, 7).await.unwrap();
        store.add_swears(1, 20, 0).await.unwrap();

        let mut counts = store.swear_counts(1).await.unwrap();
        counts.sort();
        assert_eq!(counts, vec![(10, 5)]);
    }

    #[tokio::test]
    async fn support_throttle_enforces_cooldown() {
        let store = MemoryStorage::new();
        assert!(store.throttle_support(5, 30).await.unwrap().is_none());
        let remaining = store.throttle_support(5, 30).await.unwrap();
        assert!(matches!(remaining, Some(secs) if secs > 0 && secs <= 30));
    }

    #[tokio::test]
    async fn concurrent_toggle_storm_preserves_parity() {
        let store = Arc::new(MemoryStorage::new());
        let toggles_per_task = 25usize;
        let tasks = 8usize;

        let mut handles = Vec::new();
        for _ in 0..tasks {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..toggles_per_task {
                    store.toggle_personal_block(1, 10, 20, None).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 200 toggles total: even count must leave the row absent.
        assert!(store.personal_block(1, 10, 20).await.unwrap().is_none());
        assert_eq!(store.chat_personal_blocks(1).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = MemoryStorage::with_snapshot(path.clone());
        store
            .toggle_personal_block(1, 10, 20, Some("тихо".into()))
            .await
            .unwrap();
        store.toggle_global_block(1, 30, None).await.unwrap();
        store.toggle_exception(1, 30, 40).await.unwrap();
        store.set_autoresponder(10, "не пишите мне".into()).await.unwrap();
        store.add_swears(1, 20, 4).await.unwrap();
        store.upsert_profile(profile(20, "noisy", "Шумный")).await.unwrap();
        store.persist().await.unwrap();

        let reborn = MemoryStorage::with_snapshot(path);
        reborn.load().await.unwrap();
        assert!(reborn.personal_block(1, 10, 20).await.unwrap().is_some());
        assert!(reborn.global_block(1, 30).await.unwrap().is_some());
        assert!(reborn.is_excepted(1, 30, 40).await.unwrap());
        assert_eq!(
            reborn.autoresponder(10).await.unwrap().as_deref(),
            Some("не пишите мне")
        );
        assert_eq!(reborn.swear_counts(1).await.unwrap(), vec![(20, 4)]);
        assert_eq!(
            reborn
                .profile_by_username("noisy")
                .await
                .unwrap()
                .unwrap()
                .user_id,
            20
        );
    }
}
