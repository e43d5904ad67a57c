// src/bot/menu.rs - Private-chat menu: autoresponder entry, support, admin replies

use log::{info, warn};
use std::sync::Arc;

use crate::bot::sessions::{SessionState, SessionTracker};
use crate::config::Settings;
use crate::storage::Storage;
use crate::types::IncomingMessage;

const BUTTON_AUTORESPONDER: &str = "✍️ Глобальный автоответчик";
const BUTTON_SUPPORT: &str = "👨‍🔧 Тех.поддержка";
const BUTTON_HELP: &str = "❓ Помощь";
const CANCEL_COMMAND: &str = "/cancel";
const REPLY_COMMAND: &str = "/reply";

/// Handles everything the bot does in private chats. The moderation engine
/// consumes nothing from here; the session FSM exists for the menu only.
pub struct PrivateMenu {
    storage: Arc<dyn Storage>,
    sessions: SessionTracker,
    admin_id: Option<i64>,
}

impl PrivateMenu {
    pub fn new(storage: Arc<dyn Storage>, admin_id: Option<i64>) -> Self {
        Self {
            storage,
            sessions: SessionTracker::new(),
            admin_id,
        }
    }

    /// Returns messages to send as (chat_id, text) pairs.
    pub async fn handle(
        &self,
        msg: &IncomingMessage,
        settings: &Settings,
    ) -> Vec<(i64, String)> {
        let chat_id = msg.chat_id;
        let text = msg.text.trim();

        if text == CANCEL_COMMAND {
            self.sessions.cancel(chat_id).await;
            return vec![(chat_id, "❌ Отменено.".to_string())];
        }

        // Menu navigation clears any pending session unconditionally.
        match text {
            "/start" => {
                self.sessions.cancel(chat_id).await;
                return vec![(chat_id, greeting_text())];
            }
            BUTTON_HELP => {
                self.sessions.cancel(chat_id).await;
                return vec![(chat_id, help_text(settings))];
            }
            BUTTON_AUTORESPONDER => {
                self.sessions.cancel(chat_id).await;
                let current = self
                    .storage
                    .autoresponder(msg.sender.id)
                    .await
                    .unwrap_or_default();
                let mut reply = String::from("✍️ Глобальный автоответчик\n\n");
                match current {
                    Some(text) => {
                        reply.push_str(&format!("Текущий автоответчик:\n\"{}\"\n\n", text))
                    }
                    None => reply.push_str("У вас пока не установлен глобальный автоответчик.\n\n"),
                }
                reply.push_str("Отправьте мне новый текст автоответчика или /cancel для отмены.");
                self.sessions
                    .set(chat_id, SessionState::AwaitingAutoresponderText)
                    .await;
                return vec![(chat_id, reply)];
            }
            BUTTON_SUPPORT => {
                self.sessions.cancel(chat_id).await;
                self.sessions
                    .set(chat_id, SessionState::AwaitingSupportText)
                    .await;
                return vec![(
                    chat_id,
                    "👨‍🔧 Тех.поддержка\n\nОпишите вашу проблему или вопрос, и я передам его \
                     администратору.\n\nОтправьте /cancel для отмены."
                        .to_string(),
                )];
            }
            _ => {}
        }

        if let Some(rest) = text.strip_prefix(REPLY_COMMAND) {
            return self.start_admin_reply(msg, rest).await;
        }

        match self.sessions.take(chat_id).await {
            Some(SessionState::AwaitingAutoresponderText) => {
                if let Err(e) = self
                    .storage
                    .set_autoresponder(msg.sender.id, text.to_string())
                    .await
                {
                    warn!("Failed to store autoresponder: {}", e);
                    return vec![(chat_id, "⚠️ Не удалось сохранить, попробуйте ещё раз.".into())];
                }
                vec![(chat_id, "✅ Глобальный автоответчик успешно установлен!".into())]
            }
            Some(SessionState::AwaitingSupportText) => {
                self.forward_to_support(msg, settings).await
            }
            Some(SessionState::AwaitingAdminReply { recipient }) => {
                info!("Admin reply to user {}", recipient);
                vec![
                    (recipient, format!("💬 Ответ от администратора:\n\n{}", text)),
                    (chat_id, format!("✅ Ответ отправлен пользователю {}!", recipient)),
                ]
            }
            None => vec![(chat_id, greeting_text())],
        }
    }

    async fn start_admin_reply(&self, msg: &IncomingMessage, rest: &str) -> Vec<(i64, String)> {
        let chat_id = msg.chat_id;
        if self.admin_id != Some(msg.sender.id) {
            return vec![(chat_id, "У вас нет прав администратора.".to_string())];
        }
        let Ok(recipient) = rest.trim().parse::<i64>() else {
            return vec![(
                chat_id,
                format!("Использование: {} <id пользователя>", REPLY_COMMAND),
            )];
        };
        self.sessions
            .set(chat_id, SessionState::AwaitingAdminReply { recipient })
            .await;
        vec![(
            chat_id,
            format!(
                "✏️ Напишите ваш ответ пользователю {}:\n\nОтправьте /cancel для отмены.",
                recipient
            ),
        )]
    }

    async fn forward_to_support(
        &self,
        msg: &IncomingMessage,
        settings: &Settings,
    ) -> Vec<(i64, String)> {
        let chat_id = msg.chat_id;
        let cooldown = settings.support.cooldown_secs;
        match self.storage.throttle_support(msg.sender.id, cooldown).await {
            Ok(Some(wait)) => {
                return vec![(
                    chat_id,
                    format!(
                        "⏰ Пожалуйста, подождите {} сек. перед отправкой следующего сообщения.",
                        wait
                    ),
                )];
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Support throttle check failed: {}", e);
            }
        }
        if let Err(e) = self
            .storage
            .save_support_message(msg.sender.id, msg.text.clone())
            .await
        {
            warn!("Failed to persist support message: {}", e);
        }

        let mut out = Vec::new();
        if let Some(admin_id) = self.admin_id {
            let mut from = format!("От: {}", msg.sender.display_name());
            if let Some(username) = &msg.sender.username {
                from.push_str(&format!(" (@{})", username));
            }
            from.push_str(&format!("\nID: {}", msg.sender.id));
            out.push((
                admin_id,
                format!(
                    "📩 Новое сообщение в тех.поддержку:\n\n{}\n\nСообщение:\n{}\n\n\
                     Ответить: {} {}",
                    from, msg.text, REPLY_COMMAND, msg.sender.id
                ),
            ));
            out.push((
                chat_id,
                "✅ Ваше сообщение отправлено администратору!\nОн свяжется с вами в ближайшее время."
                    .to_string(),
            ));
        } else {
            out.push((
                chat_id,
                "✅ Ваше сообщение сохранено!\nАдминистратор увидит его при следующей проверке."
                    .to_string(),
            ));
        }
        out
    }
}

fn greeting_text() -> String {
    format!(
        "👋 Добро пожаловать!\n\nЗдесь вы можете настроить свой глобальный автоответчик: \
         он будет показан заблокированному пользователю, если вы не указали персональный \
         текст.\n\nМеню:\n• {}\n• {}\n• {}",
        BUTTON_AUTORESPONDER, BUTTON_SUPPORT, BUTTON_HELP
    )
}

fn help_text(settings: &Settings) -> String {
    let k = &settings.commands;
    format!(
        "❓ Помощь\n\n📝 Команды в групповых чатах:\n\n\
         1️⃣ «{stop}» в ответ на сообщение — заблокировать/разблокировать пользователю \
         возможность отвечать на ваши сообщения. Текст со следующей строки станет \
         персональным автоответчиком.\n\n\
         2️⃣ «{stop} {all}» — закрыть ответы для всех сразу; «{stop}» в ответ на чьё-то \
         сообщение тогда делает для него исключение.\n\n\
         3️⃣ «{list}» — список блокировок в чате; «{list} {mine}» — только ваши.\n\n\
         4️⃣ «{top}» — статистика сквернословов.\n\n\
         ⚠️ Бот должен быть администратором чата с правом удаления сообщений!",
        stop = k.stop_phrase,
        all = k.all_qualifier,
        list = k.list_phrase,
        mine = k.mine_qualifier,
        top = k.top_phrase,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::types::UserRef;
    use chrono::Utc;

    fn private_message(sender_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat_id: sender_id,
            message_id: 1,
            sender: UserRef {
                id: sender_id,
                first_name: "Ника".to_string(),
                last_name: None,
                username: Some("nika".to_string()),
            },
            text: text.to_string(),
            reply_to: None,
            mentions: vec![],
            is_private: true,
            timestamp: Utc::now(),
        }
    }

    fn menu_with_admin(admin: Option<i64>) -> (PrivateMenu, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let menu = PrivateMenu::new(Arc::clone(&storage) as Arc<dyn Storage>, admin);
        (menu, storage)
    }

    #[tokio::test]
    async fn autoresponder_flow_stores_text() {
        let (menu, storage) = menu_with_admin(None);
        let settings = Settings::default();

        menu.handle(&private_message(5, BUTTON_AUTORESPONDER), &settings)
            .await;
        let replies = menu
            .handle(&private_message(5, "я в отпуске"), &settings)
            .await;

        assert!(replies[0].1.contains("успешно"));
        assert_eq!(
            storage.autoresponder(5).await.unwrap().as_deref(),
            Some("я в отпуске")
        );
    }

    #[tokio::test]
    async fn cancel_aborts_pending_entry() {
        let (menu, storage) = menu_with_admin(None);
        let settings = Settings::default();

        menu.handle(&private_message(5, BUTTON_AUTORESPONDER), &settings)
            .await;
        let replies = menu.handle(&private_message(5, "/cancel"), &settings).await;
        assert!(replies[0].1.contains("Отменено"));

        // The follow-up text no longer lands in the autoresponder.
        menu.handle(&private_message(5, "не сохраняй"), &settings).await;
        assert_eq!(storage.autoresponder(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn navigating_to_another_menu_item_clears_the_session() {
        let (menu, storage) = menu_with_admin(None);
        let settings = Settings::default();

        menu.handle(&private_message(5, BUTTON_AUTORESPONDER), &settings)
            .await;
        menu.handle(&private_message(5, BUTTON_SUPPORT), &settings)
            .await;
        // This text goes to support, not into the autoresponder.
        menu.handle(&private_message(5, "помогите"), &settings).await;
        assert_eq!(storage.autoresponder(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn support_message_reaches_admin_with_reply_hint() {
        let (menu, _) = menu_with_admin(Some(99));
        let settings = Settings::default();

        menu.handle(&private_message(5, BUTTON_SUPPORT), &settings)
            .await;
        let replies = menu
            .handle(&private_message(5, "бот не удаляет сообщения"), &settings)
            .await;

        let to_admin = replies.iter().find(|(chat, _)| *chat == 99).unwrap();
        assert!(to_admin.1.contains("бот не удаляет сообщения"));
        assert!(to_admin.1.contains("/reply 5"));
    }

    #[tokio::test]
    async fn support_cooldown_blocks_rapid_requests() {
        let (menu, _) = menu_with_admin(None);
        let settings = Settings::default();

        menu.handle(&private_message(5, BUTTON_SUPPORT), &settings).await;
        menu.handle(&private_message(5, "первое"), &settings).await;
        menu.handle(&private_message(5, BUTTON_SUPPORT), &settings).await;
        let replies = menu.handle(&private_message(5, "второе"), &settings).await;
        assert!(replies[0].1.contains("подождите"));
    }

    #[tokio::test]
    async fn admin_reply_round_trip() {
        let (menu, _) = menu_with_admin(Some(99));
        let settings = Settings::default();

        let start = menu.handle(&private_message(99, "/reply 5"), &settings).await;
        assert!(start[0].1.contains("пользователю 5"));

        let replies = menu
            .handle(&private_message(99, "исправили, обновитесь"), &settings)
            .await;
        let to_user = replies.iter().find(|(chat, _)| *chat == 5).unwrap();
        assert!(to_user.1.contains("исправили, обновитесь"));
    }

    #[tokio::test]
    async fn reply_command_requires_admin() {
        let (menu, _) = menu_with_admin(Some(99));
        let settings = Settings::default();
        let replies = menu.handle(&private_message(5, "/reply 7"), &settings).await;
        assert!(replies[0].1.contains("нет прав"));
    }
}
