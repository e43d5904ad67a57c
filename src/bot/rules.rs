// src/bot/rules.rs - Block precedence and verdicts

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::Storage;
use crate::types::{StorageError, Target, UserRef, Verdict};

/// Decides ALLOW/SUPPRESS for messages and applies the stop/stop-all
/// toggles, honoring precedence between personal blocks, global blocks and
/// exceptions. All user input problems come back as advisory verdict text
/// with zero store mutation.
pub struct RuleEngine {
    storage: Arc<dyn Storage>,
}

impl RuleEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Targeted stop command. With an active global block for the actor the
    /// command toggles the target's exception instead of a personal block:
    /// "stop" then means "exempt this person", not "block this person".
    pub async fn apply_stop(
        &self,
        chat_id: i64,
        actor: &UserRef,
        targets: &[Target],
        payload: Option<String>,
    ) -> String {
        let resolved = targets
            .iter()
            .find_map(|t| t.user_id.map(|id| (id, t)));
        let Some((target_id, target)) = resolved else {
            return match targets.first() {
                Some(unresolved) => format!(
                    "❌ Не удалось найти пользователя {}.",
                    unresolved.display_name
                ),
                None => "❌ Ответьте на сообщение пользователя или укажите @username того, \
                         кого хотите заблокировать/разблокировать."
                    .to_string(),
            };
        };
        if target_id == actor.id {
            return "❌ Вы не можете заблокировать самого себя.".to_string();
        }

        let actor_name = actor.display_name();
        let global = match self.storage.global_block(chat_id, actor.id).await {
            Ok(global) => global,
            Err(e) => return store_failure("read global block", e),
        };

        if global.is_some() {
            match self
                .storage
                .toggle_exception(chat_id, actor.id, target_id)
                .await
            {
                Ok(true) => format!(
                    "🔓 {} разрешил(а) пользователю {} отвечать несмотря на общий запрет.",
                    actor_name, target.display_name
                ),
                Ok(false) => format!(
                    "🔒 {} снова попадает под общий запрет пользователя {}.",
                    target.display_name, actor_name
                ),
                Err(e) => store_failure("toggle exception", e),
            }
        } else {
            let has_notice = payload.is_some();
            match self
                .storage
                .toggle_personal_block(chat_id, actor.id, target_id, payload)
                .await
            {
                Ok(true) if has_notice => format!(
                    "🔒 {} запретил(а) пользователю {} отвечать на свои сообщения \
                     и установил(а) персональный автоответчик.",
                    actor_name, target.display_name
                ),
                Ok(true) => format!(
                    "🔒 {} запретил(а) пользователю {} отвечать на свои сообщения.",
                    actor_name, target.display_name
                ),
                Ok(false) => format!(
                    "🔓 {} разрешил(а) пользователю {} снова отвечать на свои сообщения.",
                    actor_name, target.display_name
                ),
                Err(e) => store_failure("toggle personal block", e),
            }
        }
    }

    /// Stop-all command: toggles the actor's block-everyone flag. Personal
    /// blocks are an independent layer and stay untouched.
    pub async fn apply_stop_all(
        &self,
        chat_id: i64,
        actor: &UserRef,
        payload: Option<String>,
    ) -> String {
        let actor_name = actor.display_name();
        let has_notice = payload.is_some();
        match self
            .storage
            .toggle_global_block(chat_id, actor.id, payload)
            .await
        {
            Ok(true) if has_notice => format!(
                "🔒 {} запретил(а) всем отвечать на свои сообщения и установил(а) \
                 автоответчик. Команда «стоп» в ответ на чьё-то сообщение теперь \
                 делает для него исключение.",
                actor_name
            ),
            Ok(true) => format!(
                "🔒 {} запретил(а) всем отвечать на свои сообщения. Команда «стоп» \
                 в ответ на чьё-то сообщение теперь делает для него исключение.",
                actor_name
            ),
            Ok(false) => format!(
                "🔓 {} снова разрешил(а) всем отвечать на свои сообщения.",
                actor_name
            ),
            Err(e) => store_failure("toggle global block", e),
        }
    }

    /// Enforcement: first SUPPRESS among the resolved targets wins;
    /// unresolved targets are skipped, not blocking.
    pub async fn evaluate(
        &self,
        chat_id: i64,
        sender_id: i64,
        targets: &[Target],
        default_notice: &str,
    ) -> Verdict {
        for target in targets {
            let Some(target_id) = target.user_id else { continue };
            // A self-addressed target can never suppress the sender.
            if target_id == sender_id {
                continue;
            }
            match self
                .evaluate_single(chat_id, sender_id, target_id, default_notice)
                .await
            {
                Ok(Some(notice)) => {
                    debug!(
                        "Suppressing message from {} to {} in chat {}",
                        sender_id, target_id, chat_id
                    );
                    return Verdict::Suppress {
                        notice,
                        blocker: target.display_name.clone(),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    // Enforcement is read-only; on storage trouble let the
                    // message through rather than guessing.
                    warn!("Enforcement read failed: {}", e);
                }
            }
        }
        Verdict::Allow
    }

    async fn evaluate_single(
        &self,
        chat_id: i64,
        sender_id: i64,
        target_id: i64,
        default_notice: &str,
    ) -> Result<Option<String>, StorageError> {
        if let Some(global) = self.storage.global_block(chat_id, target_id).await? {
            if !self
                .storage
                .is_excepted(chat_id, target_id, sender_id)
                .await?
            {
                return Ok(Some(
                    self.notice_fallback(global.notice, target_id, default_notice)
                        .await?,
                ));
            }
        }
        if let Some(personal) = self
            .storage
            .personal_block(chat_id, target_id, sender_id)
            .await?
        {
            return Ok(Some(
                self.notice_fallback(personal.notice, target_id, default_notice)
                    .await?,
            ));
        }
        Ok(None)
    }

    /// Notice precedence: rule-specific text, then the blocker's global
    /// autoresponder, then the fixed default.
    async fn notice_fallback(
        &self,
        specific: Option<String>,
        blocker_id: i64,
        default_notice: &str,
    ) -> Result<String, StorageError> {
        if let Some(text) = specific {
            return Ok(text);
        }
        if let Some(text) = self.storage.autoresponder(blocker_id).await? {
            return Ok(text);
        }
        Ok(default_notice.to_string())
    }

    /// Text for the list command: all personal blocks in a chat, grouped by
    /// blocker, plus who has block-everyone on.
    pub async fn chat_summary(&self, chat_id: i64) -> String {
        let blocks = match self.storage.chat_personal_blocks(chat_id).await {
            Ok(blocks) => blocks,
            Err(e) => return store_failure("list blocks", e),
        };
        let mut grouped: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for block in &blocks {
            grouped.entry(block.blocker_id).or_default().push(block.blocked_id);
        }
        let mut lines: Vec<String> = Vec::new();
        for (blocker_id, blocked_ids) in grouped {
            let mut blocked_names = Vec::new();
            for blocked_id in blocked_ids {
                blocked_names.push(self.name_of(blocked_id).await);
            }
            lines.push(format!(
                "• {} запретил(а) отвечать: {}.",
                self.name_of(blocker_id).await,
                blocked_names.join(", ")
            ));
        }
        if lines.is_empty() {
            "📋 В этом чате нет активных блокировок.".to_string()
        } else {
            format!(
                "📋 Список персональных блокировок в этом чате:\n\n{}",
                lines.join("\n")
            )
        }
    }

    /// Text for the "list mine" command: the actor's own block state.
    pub async fn block_profile(&self, chat_id: i64, user: &UserRef) -> String {
        let blocks = match self.storage.personal_blocks_by(chat_id, user.id).await {
            Ok(blocks) => blocks,
            Err(e) => return store_failure("list own blocks", e),
        };
        let global = match self.storage.global_block(chat_id, user.id).await {
            Ok(global) => global,
            Err(e) => return store_failure("read global block", e),
        };

        let mut text = String::from("📋 Ваши блокировки в этом чате:\n");
        if let Some(_block) = &global {
            text.push_str("\n🔒 Общий запрет включён: отвечать вам не может никто");
            match self.storage.exceptions(chat_id, user.id).await {
                Ok(allowed) if !allowed.is_empty() => {
                    let mut names = Vec::new();
                    for id in allowed {
                        names.push(self.name_of(id).await);
                    }
                    text.push_str(&format!(", кроме: {}.\n", names.join(", ")));
                }
                Ok(_) => text.push_str(".\n"),
                Err(e) => return store_failure("list exceptions", e),
            }
        }
        if blocks.is_empty() {
            if global.is_none() {
                text.push_str("\nВы никого не блокировали.");
            }
        } else {
            text.push_str("\nПерсонально заблокированы:\n");
            for block in blocks {
                let marker = if block.notice.is_some() {
                    " (свой автоответчик)"
                } else {
                    ""
                };
                text.push_str(&format!(
                    "• {}{}\n",
                    self.name_of(block.blocked_id).await,
                    marker
                ));
            }
        }
        text.trim_end().to_string()
    }

    async fn name_of(&self, user_id: i64) -> String {
        match self.storage.profile(user_id).await {
            Ok(Some(profile)) => profile.display_name(),
            _ => format!("ID{}", user_id),
        }
    }
}

fn store_failure(operation: &str, e: StorageError) -> String {
    warn!("Storage operation '{}' failed: {}", operation, e);
    "⚠️ Не удалось выполнить операцию, попробуйте ещё раз.".to_string()
}
