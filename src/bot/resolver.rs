// src/bot/resolver.rs - Extracting candidate recipients from a message

use futures_util::future::join_all;
use log::{debug, warn};
use regex::Regex;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::platforms::ChatPlatform;
use crate::storage::Storage;
use crate::types::{IncomingMessage, PlatformError, Target};

/// Builds the ordered, de-duplicated target list for a message.
///
/// Order: reply-to author, platform-resolved mention entities in text order,
/// then plain `@username` occurrences looked up against the profile cache.
/// Duplicates are keyed by numeric id when known, else lowercased username.
pub struct TargetResolver {
    storage: Arc<dyn Storage>,
    username_re: Regex,
}

impl TargetResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            // Telegram-style usernames: latin letters, digits, underscore.
            username_re: Regex::new(r"@([A-Za-z][A-Za-z0-9_]{2,31})").expect("static regex"),
        }
    }

    /// Extract targets without touching the network. Unknown usernames come
    /// back unresolved; `upgrade_unresolved` may fill them in later.
    pub async fn resolve(&self, msg: &IncomingMessage) -> Vec<Target> {
        let mut targets: Vec<Target> = Vec::new();

        if let Some(author) = &msg.reply_to {
            push_unique(&mut targets, Target::from_user(author));
        }

        let mut mentions = msg.mentions.clone();
        mentions.sort_by_key(|m| m.offset);
        for mention in &mentions {
            push_unique(&mut targets, Target::from_user(&mention.user));
        }

        for captures in self.username_re.captures_iter(&msg.text) {
            let username = &captures[1];
            let target = match self.storage.profile_by_username(username).await {
                Ok(Some(profile)) => Target {
                    user_id: Some(profile.user_id),
                    display_name: profile.display_name(),
                    username: profile.username.clone(),
                },
                Ok(None) => Target::unresolved(username),
                Err(e) => {
                    warn!("Profile lookup for @{} failed: {}", username, e);
                    Target::unresolved(username)
                }
            };
            push_unique(&mut targets, target);
        }

        debug!(
            "Resolved {} target(s) for message {} in chat {}",
            targets.len(),
            msg.message_id,
            msg.chat_id
        );
        targets
    }

    /// Deferred fetch: ask the platform about every still-unresolved target,
    /// each lookup bounded by `fetch_timeout`. Successful lookups upgrade the
    /// target in place and warm the profile cache; failures leave it as is.
    pub async fn upgrade_unresolved(
        &self,
        platform: &Arc<dyn ChatPlatform>,
        targets: &mut [Target],
        fetch_timeout: Duration,
    ) {
        let pending: Vec<(usize, String)> = targets
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_resolved())
            .filter_map(|(i, t)| t.username.clone().map(|u| (i, u)))
            .collect();
        if pending.is_empty() {
            return;
        }

        let lookups = pending.iter().map(|(index, username)| {
            let platform = Arc::clone(platform);
            let username = username.clone();
            let index = *index;
            async move {
                match timeout(fetch_timeout, platform.fetch_user_by_username(&username)).await {
                    Ok(Ok(profile)) => (index, Some(profile)),
                    Ok(Err(PlatformError::NotFound)) => {
                        debug!("Username @{} unknown to the platform", username);
                        (index, None)
                    }
                    Ok(Err(e)) => {
                        warn!("Deferred lookup of @{} failed: {}", username, e);
                        (index, None)
                    }
                    Err(_) => {
                        warn!("Deferred lookup of @{} timed out", username);
                        (index, None)
                    }
                }
            }
        });

        for (index, profile) in join_all(lookups).await {
            let Some(profile) = profile else { continue };
            if let Err(e) = self.storage.upsert_profile(profile.clone()).await {
                warn!("Failed to cache fetched profile: {}", e);
            }
            targets[index] = Target {
                user_id: Some(profile.user_id),
                display_name: profile.display_name(),
                username: profile.username,
            };
        }
    }
}

fn push_unique(targets: &mut Vec<Target>, candidate: Target) {
    let duplicate = targets.iter().any(|t| match (t.user_id, candidate.user_id) {
        (Some(a), Some(b)) => a == b,
        _ => match (&t.username, &candidate.username) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        },
    });
    if !duplicate {
        targets.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::{ResolvedMention, UserProfile, UserRef};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::broadcast;

    fn user(id: i64, first: &str, username: Option<&str>) -> UserRef {
        UserRef {
            id,
            first_name: first.to_string(),
            last_name: None,
            username: username.map(String::from),
        }
    }

    fn message(text: &str, reply_to: Option<UserRef>, mentions: Vec<ResolvedMention>) -> IncomingMessage {
        IncomingMessage {
            chat_id: 1,
            message_id: 100,
            sender: user(999, "Отправитель", None),
            text: text.to_string(),
            reply_to,
            mentions,
            is_private: false,
            timestamp: Utc::now(),
        }
    }

    struct StubPlatform {
        known: Option<UserProfile>,
    }

    #[async_trait]
    impl ChatPlatform for StubPlatform {
        async fn connect(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn platform_name(&self) -> &str {
            "stub"
        }
        async fn is_connected(&self) -> bool {
            true
        }
        fn message_receiver(&self) -> Option<broadcast::Receiver<IncomingMessage>> {
            None
        }
        async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<i64, PlatformError> {
            Ok(1)
        }
        async fn send_notice(&self, _chat_id: i64, _text: &str) -> Result<i64, PlatformError> {
            Ok(1)
        }
        async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn fetch_user_by_username(
            &self,
            username: &str,
        ) -> Result<UserProfile, PlatformError> {
            match &self.known {
                Some(profile)
                    if profile.username.as_deref().unwrap_or_default().to_lowercase()
                        == username.to_lowercase() =>
                {
                    Ok(profile.clone())
                }
                _ => Err(PlatformError::NotFound),
            }
        }
        async fn disconnect(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reply_author_comes_first() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let resolver = TargetResolver::new(Arc::clone(&storage));
        let msg = message(
            "@vasya привет",
            Some(user(10, "Автор", Some("author"))),
            vec![ResolvedMention {
                user: user(20, "Вася", Some("vasya")),
                offset: 0,
            }],
        );

        let targets = resolver.resolve(&msg).await;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].user_id, Some(10));
        assert_eq!(targets[1].user_id, Some(20));
    }

    #[tokio::test]
    async fn duplicates_are_dropped_by_id_and_username() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let resolver = TargetResolver::new(Arc::clone(&storage));
        // Reply author also appears as a mention entity and as plain text.
        let author = user(10, "Вася", Some("vasya"));
        let msg = message(
            "@vasya @vasya смотри",
            Some(author.clone()),
            vec![ResolvedMention {
                user: author,
                offset: 0,
            }],
        );

        let targets = resolver.resolve(&msg).await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].user_id, Some(10));
    }

    #[tokio::test]
    async fn known_username_resolves_via_profile_cache() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .upsert_profile(UserProfile {
                user_id: 42,
                username: Some("Masha".to_string()),
                first_name: "Маша".to_string(),
                last_name: None,
                last_seen: Utc::now(),
            })
            .await
            .unwrap();
        let resolver = TargetResolver::new(storage as Arc<dyn Storage>);

        let targets = resolver
            .resolve(&message("эй @masha зацени", None, vec![]))
            .await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].user_id, Some(42));
        assert_eq!(targets[0].display_name, "Маша");
    }

    #[tokio::test]
    async fn unknown_username_stays_unresolved() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let resolver = TargetResolver::new(storage);

        let targets = resolver
            .resolve(&message("эй @stranger", None, vec![]))
            .await;
        assert_eq!(targets.len(), 1);
        assert!(!targets[0].is_resolved());
        assert_eq!(targets[0].display_name, "@stranger");
    }

    #[tokio::test]
    async fn deferred_fetch_upgrades_and_caches() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = TargetResolver::new(Arc::clone(&storage) as Arc<dyn Storage>);
        let platform: Arc<dyn ChatPlatform> = Arc::new(StubPlatform {
            known: Some(UserProfile {
                user_id: 77,
                username: Some("stranger".to_string()),
                first_name: "Гость".to_string(),
                last_name: None,
                last_seen: Utc::now(),
            }),
        });

        let mut targets = resolver
            .resolve(&message("эй @stranger", None, vec![]))
            .await;
        resolver
            .upgrade_unresolved(&platform, &mut targets, Duration::from_millis(200))
            .await;

        assert_eq!(targets[0].user_id, Some(77));
        assert_eq!(targets[0].display_name, "Гость");
        // Cache is warmed for the next plain lookup.
        assert_eq!(
            storage
                .profile_by_username("stranger")
                .await
                .unwrap()
                .unwrap()
                .user_id,
            77
        );
    }

    #[tokio::test]
    async fn failed_deferred_fetch_leaves_target_unresolved() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let resolver = TargetResolver::new(storage);
        let platform: Arc<dyn ChatPlatform> = Arc::new(StubPlatform { known: None });

        let mut targets = resolver
            .resolve(&message("эй @nobody", None, vec![]))
            .await;
        resolver
            .upgrade_unresolved(&platform, &mut targets, Duration::from_millis(200))
            .await;
        assert!(!targets[0].is_resolved());
    }
}
