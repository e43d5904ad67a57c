// src/bot/mod.rs - GuardBot: the engine wiring every subsystem together

use anyhow::Result;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;

use crate::config::{SettingsEvent, SettingsManager};
use crate::platforms::ChatPlatform;
use crate::storage::Storage;
use crate::types::{
    html_escape, CommandKind, IncomingMessage, MessageAction, UserProfile, Verdict,
};

pub mod commands;
pub mod ledger;
pub mod lexicon;
pub mod menu;
pub mod resolver;
pub mod rules;
pub mod sessions;

use commands::CommandInterpreter;
use ledger::SwearLedger;
use lexicon::LexiconMatcher;
use menu::PrivateMenu;
use resolver::TargetResolver;
use rules::RuleEngine;

/// The bot engine: one instance constructed at startup and shared by
/// reference into every handler task.
///
/// Group messages run through a fixed chain: lexicon scan (feeding the swear
/// ledger), command parse, then target-addressed enforcement.
pub struct GuardBot {
    settings: Arc<SettingsManager>,
    storage: Arc<dyn Storage>,
    lexicon: RwLock<LexiconMatcher>,
    interpreter: RwLock<CommandInterpreter>,
    resolver: TargetResolver,
    rules: RuleEngine,
    ledger: SwearLedger,
    menu: PrivateMenu,
    platform: RwLock<Option<Arc<dyn ChatPlatform>>>,
    /// Chats already warned about missing delete permissions.
    warned_chats: RwLock<HashSet<i64>>,
}

impl GuardBot {
    pub async fn new(
        settings: Arc<SettingsManager>,
        storage: Arc<dyn Storage>,
        admin_id: Option<i64>,
    ) -> Self {
        let current = settings.current().await;
        Self {
            lexicon: RwLock::new(LexiconMatcher::new(&current.vocabulary)),
            interpreter: RwLock::new(CommandInterpreter::new(current.commands.clone())),
            resolver: TargetResolver::new(Arc::clone(&storage)),
            rules: RuleEngine::new(Arc::clone(&storage)),
            ledger: SwearLedger::new(Arc::clone(&storage)),
            menu: PrivateMenu::new(Arc::clone(&storage), admin_id),
            settings,
            storage,
            platform: RwLock::new(None),
            warned_chats: RwLock::new(HashSet::new()),
        }
    }

    /// Connect the platform and start processing its messages.
    pub async fn start(self: &Arc<Self>, platform: Arc<dyn ChatPlatform>) -> Result<()> {
        info!("Starting bot engine...");
        platform.connect().await?;
        let receiver = platform
            .message_receiver()
            .ok_or_else(|| anyhow::anyhow!("platform has no message channel"))?;
        *self.platform.write().await = Some(Arc::clone(&platform));

        let bot = Arc::clone(self);
        tokio::spawn(async move {
            bot.process_messages(receiver).await;
        });

        let bot = Arc::clone(self);
        let mut changes = self.settings.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = changes.recv().await {
                match event {
                    SettingsEvent::Reloaded => bot.apply_settings().await,
                    SettingsEvent::Invalid { error } => {
                        warn!("Keeping previous settings: {}", error)
                    }
                }
            }
        });

        info!("Bot engine started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down bot engine...");
        if let Some(platform) = self.platform.write().await.take() {
            if let Err(e) = platform.disconnect().await {
                error!("Error disconnecting platform: {}", e);
            }
        }
        if let Err(e) = self.storage.persist().await {
            error!("Failed to persist storage on shutdown: {}", e);
        }
        info!("Bot engine shutdown complete");
    }

    /// Ranked (user id, count) pairs for reporting.
    pub async fn top_swearers(&self, chat_id: i64, n: usize) -> Vec<(i64, u64)> {
        self.ledger.top(chat_id, n).await
    }

    /// A user's block state in a chat, rendered for reporting.
    pub async fn block_profile(&self, chat_id: i64, user: &crate::types::UserRef) -> String {
        self.rules.block_profile(chat_id, user).await
    }

    /// Rebuild the subsystems that cache settings.
    async fn apply_settings(&self) {
        let settings = self.settings.current().await;
        *self.lexicon.write().await = LexiconMatcher::new(&settings.vocabulary);
        *self.interpreter.write().await = CommandInterpreter::new(settings.commands.clone());
        info!("Applied reloaded settings");
    }

    /// One handler task per message, so a slow deferred lookup in one chat
    /// never stalls the others. Same-chat toggles stay safe because every
    /// storage toggle is an atomic read-modify-write.
    async fn process_messages(self: &Arc<Self>, mut receiver: broadcast::Receiver<IncomingMessage>) {
        info!("Message processor started");
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let bot = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = bot.process_message(&message).await {
                            error!("Failed to process message {}: {:#}", message.message_id, e);
                        }
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Message receiver lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Message channel closed");
                    break;
                }
            }
        }
    }

    async fn process_message(&self, msg: &IncomingMessage) -> Result<()> {
        if msg.is_private {
            self.observe_profiles(msg).await;
            let settings = self.settings.current().await;
            let replies = self.menu.handle(msg, &settings).await;
            let platform = self.platform.read().await.clone();
            if let Some(platform) = platform {
                for (chat_id, text) in replies {
                    if let Err(e) = platform.send_message(chat_id, &text).await {
                        warn!("Failed to send private reply to {}: {}", chat_id, e);
                    }
                }
            }
            return Ok(());
        }

        let action = self.handle_group_message(msg).await;
        self.deliver(msg, action).await;
        Ok(())
    }

    /// Upsert the profile cache from every observed sender, reply target and
    /// resolved mention.
    async fn observe_profiles(&self, msg: &IncomingMessage) {
        let mut seen = vec![&msg.sender];
        if let Some(author) = &msg.reply_to {
            seen.push(author);
        }
        for mention in &msg.mentions {
            seen.push(&mention.user);
        }
        for user in seen {
            if let Err(e) = self.storage.upsert_profile(UserProfile::from_user(user)).await {
                warn!("Profile upsert failed for {}: {}", user.id, e);
            }
        }
    }

    /// The core decision chain for one group message.
    pub async fn handle_group_message(&self, msg: &IncomingMessage) -> MessageAction {
        self.observe_profiles(msg).await;
        let settings = self.settings.current().await;

        // 1. Vocabulary scan feeds the swear ledger, commands included.
        let hits = self.lexicon.read().await.scan(&msg.text) as u64;
        if hits > 0 {
            self.ledger.record(msg.chat_id, msg.sender.id, hits).await;
        }

        // 2. Moderation commands.
        let parsed = self.interpreter.read().await.parse(&msg.text);
        match parsed.kind {
            CommandKind::Stop => {
                let mut targets = self.resolver.resolve(msg).await;
                if targets.iter().any(|t| !t.is_resolved()) {
                    let platform = self.platform.read().await.clone();
                    if let Some(platform) = platform {
                        self.resolver
                            .upgrade_unresolved(
                                &platform,
                                &mut targets,
                                Duration::from_millis(settings.resolver.fetch_timeout_ms),
                            )
                            .await;
                    }
                }
                let payload = parsed
                    .payload
                    .as_deref()
                    .and_then(|raw| CommandInterpreter::sanitize_payload(raw, &targets));
                let text = self
                    .rules
                    .apply_stop(msg.chat_id, &msg.sender, &targets, payload)
                    .await;
                MessageAction::CommandResult { text }
            }
            CommandKind::StopAll => {
                let payload = parsed
                    .payload
                    .as_deref()
                    .and_then(|raw| CommandInterpreter::sanitize_payload(raw, &[]));
                let text = self
                    .rules
                    .apply_stop_all(msg.chat_id, &msg.sender, payload)
                    .await;
                MessageAction::CommandResult { text }
            }
            CommandKind::List => MessageAction::CommandResult {
                text: self.rules.chat_summary(msg.chat_id).await,
            },
            CommandKind::ListMine => MessageAction::CommandResult {
                text: self.rules.block_profile(msg.chat_id, &msg.sender).await,
            },
            CommandKind::Top => MessageAction::CommandResult {
                text: self.ledger.leaderboard_text(msg.chat_id, 10).await,
            },
            CommandKind::None => {
                // 3. Enforcement for target-addressed messages.
                let targets = self.resolver.resolve(msg).await;
                if targets.is_empty() {
                    return MessageAction::None;
                }
                match self
                    .rules
                    .evaluate(
                        msg.chat_id,
                        msg.sender.id,
                        &targets,
                        &settings.notices.default_notice,
                    )
                    .await
                {
                    Verdict::Allow => MessageAction::None,
                    Verdict::Suppress { notice, blocker } => MessageAction::DeleteAndNotify {
                        notice: format!(
                            "{}, {} установил(а) для вас следующий ответ:\n\n\"{}\"",
                            msg.sender.mention_html(),
                            html_escape(&blocker),
                            html_escape(&notice)
                        ),
                    },
                }
            }
        }
    }

    /// Execute a verdict against the platform.
    async fn deliver(&self, msg: &IncomingMessage, action: MessageAction) {
        let platform = match self.platform.read().await.clone() {
            Some(platform) => platform,
            None => return,
        };
        match action {
            MessageAction::None => {}
            MessageAction::CommandResult { text } => {
                if let Err(e) = platform.send_message(msg.chat_id, &text).await {
                    warn!("Failed to post command result in {}: {}", msg.chat_id, e);
                }
            }
            MessageAction::DeleteAndNotify { notice } => {
                if let Err(e) = platform.delete_message(msg.chat_id, msg.message_id).await {
                    self.warn_once_about_delivery(&platform, msg.chat_id, e).await;
                    return;
                }
                match platform.send_notice(msg.chat_id, &notice).await {
                    Ok(notice_id) => {
                        let delay = self.settings.current().await.notices.delete_after_secs;
                        schedule_delete(platform, msg.chat_id, notice_id, delay);
                    }
                    Err(e) => warn!("Failed to post notice in {}: {}", msg.chat_id, e),
                }
            }
        }
    }

    /// Missing delete rights produce one operator-facing warning per chat,
    /// never an error and never a retry.
    async fn warn_once_about_delivery(
        &self,
        platform: &Arc<dyn ChatPlatform>,
        chat_id: i64,
        cause: crate::types::PlatformError,
    ) {
        let first_time = self.warned_chats.write().await.insert(chat_id);
        if !first_time {
            return;
        }
        warn!("Cannot delete messages in chat {}: {}", chat_id, cause);
        let hint = "⚠️ Не удалось удалить сообщение. Убедитесь, что бот является \
                    администратором с правом удаления сообщений.";
        if let Err(e) = platform.send_message(chat_id, hint).await {
            warn!("Even the warning failed in chat {}: {}", chat_id, e);
        }
    }
}

/// The temporary notice cleans itself up; failures (already deleted, missing
/// rights) are swallowed.
fn schedule_delete(platform: Arc<dyn ChatPlatform>, chat_id: i64, message_id: i64, delay_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        let _ = platform.delete_message(chat_id, message_id).await;
    });
}
