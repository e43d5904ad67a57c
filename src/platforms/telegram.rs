// src/platforms/telegram.rs - Telegram Bot API adapter (HTTP long polling)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use url::Url;

use crate::platforms::ChatPlatform;
use crate::types::{IncomingMessage, PlatformError, ResolvedMention, UserProfile, UserRef};

const API_BASE: &str = "https://api.telegram.org/";

/// Configuration for the Telegram connection.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_base: Url,
    /// Long-poll wait passed to getUpdates.
    pub poll_timeout_secs: u64,
    /// Per-request timeout for everything except the long poll.
    pub request_timeout_secs: u64,
}

impl TelegramConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let token = env::var("BOT_TOKEN").context("BOT_TOKEN environment variable not set")?;
        if token.trim().is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN is empty"));
        }
        Ok(Self {
            token,
            api_base: Url::parse(API_BASE).expect("static url"),
            poll_timeout_secs: 25,
            request_timeout_secs: 10,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    caption: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
    #[serde(default)]
    entities: Vec<TgEntity>,
    #[serde(default)]
    caption_entities: Vec<TgEntity>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgUser {
    id: i64,
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgEntity {
    #[serde(rename = "type")]
    kind: String,
    offset: usize,
    user: Option<TgUser>,
}

#[derive(Debug, Deserialize)]
struct TgSentMessage {
    message_id: i64,
}

impl From<&TgUser> for UserRef {
    fn from(user: &TgUser) -> Self {
        UserRef {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
        }
    }
}

/// Telegram Bot API connection. One background task long-polls getUpdates
/// and feeds the broadcast channel.
pub struct TelegramConnection {
    config: TelegramConfig,
    http: reqwest::Client,
    message_tx: broadcast::Sender<IncomingMessage>,
    connected: Arc<RwLock<bool>>,
    poll_task: RwLock<Option<JoinHandle<()>>>,
}

impl TelegramConnection {
    pub fn new(config: TelegramConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.poll_timeout_secs + config.request_timeout_secs,
            ))
            .build()
            .expect("reqwest client");
        let (message_tx, _) = broadcast::channel(256);
        Self {
            config,
            http,
            message_tx,
            connected: Arc::new(RwLock::new(false)),
            poll_task: RwLock::new(None),
        }
    }

    fn method_url(config: &TelegramConfig, method: &str) -> Url {
        config
            .api_base
            .join(&format!("bot{}/{}", config.token, method))
            .expect("method url")
    }

    async fn call<T: DeserializeOwned>(
        http: &reqwest::Client,
        config: &TelegramConfig,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, PlatformError> {
        Self::call_with_timeout(http, config, method, params, config.request_timeout_secs).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        http: &reqwest::Client,
        config: &TelegramConfig,
        method: &str,
        params: serde_json::Value,
        timeout_secs: u64,
    ) -> Result<T, PlatformError> {
        let response = http
            .post(Self::method_url(config, method))
            .json(&params)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PlatformError::Timeout
                } else {
                    PlatformError::Transport(e)
                }
            })?;
        let body: ApiResponse<T> = response.json().await?;
        if !body.ok {
            let description = body.description.unwrap_or_else(|| "unknown error".into());
            return Err(PlatformError::Api(description));
        }
        body.result
            .ok_or_else(|| PlatformError::Api("empty result".into()))
    }

    fn convert_message(msg: TgMessage) -> Option<IncomingMessage> {
        let sender = msg.from.as_ref()?;
        let text = msg.text.or(msg.caption).unwrap_or_default();
        let reply_to = msg
            .reply_to_message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .map(UserRef::from);
        let mut mentions: Vec<ResolvedMention> = Vec::new();
        for entity in msg.entities.iter().chain(msg.caption_entities.iter()) {
            if entity.kind == "text_mention" {
                if let Some(user) = &entity.user {
                    mentions.push(ResolvedMention {
                        user: user.into(),
                        offset: entity.offset,
                    });
                }
            }
        }
        Some(IncomingMessage {
            chat_id: msg.chat.id,
            message_id: msg.message_id,
            sender: sender.into(),
            text,
            reply_to,
            mentions,
            is_private: msg.chat.kind == "private",
            timestamp: Utc
                .timestamp_opt(msg.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ChatPlatform for TelegramConnection {
    async fn connect(&self) -> Result<()> {
        info!("Connecting to Telegram Bot API...");
        let me: TgUser = Self::call(&self.http, &self.config, "getMe", json!({}))
            .await
            .context("getMe failed, check BOT_TOKEN")?;
        info!(
            "Authorized as @{} (id {})",
            me.username.as_deref().unwrap_or("?"),
            me.id
        );

        *self.connected.write().await = true;

        let http = self.http.clone();
        let config = self.config.clone();
        let message_tx = self.message_tx.clone();
        let connected = Arc::clone(&self.connected);

        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram update poller started");
            while *connected.read().await {
                let params = json!({
                    "offset": offset,
                    "timeout": config.poll_timeout_secs,
                    "allowed_updates": ["message"],
                });
                // The long poll needs more headroom than plain calls get.
                let updates: Result<Vec<TgUpdate>, PlatformError> = Self::call_with_timeout(
                    &http,
                    &config,
                    "getUpdates",
                    params,
                    config.poll_timeout_secs + config.request_timeout_secs,
                )
                .await;
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(PlatformError::Timeout) => continue,
                    Err(e) => {
                        error!("getUpdates failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        continue;
                    }
                };
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(message) = update.message else { continue };
                    if let Some(incoming) = Self::convert_message(message) {
                        debug!(
                            "Update from {} in chat {}",
                            incoming.sender.display_name(),
                            incoming.chat_id
                        );
                        if message_tx.send(incoming).is_err() {
                            warn!("No receivers for incoming message");
                        }
                    }
                }
            }
            info!("Telegram update poller stopped");
        });
        *self.poll_task.write().await = Some(handle);
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "telegram"
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    fn message_receiver(&self) -> Option<broadcast::Receiver<IncomingMessage>> {
        Some(self.message_tx.subscribe())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError> {
        let sent: TgSentMessage = Self::call(
            &self.http,
            &self.config,
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
        )
        .await?;
        Ok(sent.message_id)
    }

    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError> {
        let sent: TgSentMessage = Self::call(
            &self.http,
            &self.config,
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text, "parse_mode": "HTML" }),
        )
        .await?;
        Ok(sent.message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
        let _: bool = Self::call(
            &self.http,
            &self.config,
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<UserProfile, PlatformError> {
        let result: Result<TgChat, PlatformError> = Self::call(
            &self.http,
            &self.config,
            "getChat",
            json!({ "chat_id": format!("@{}", username) }),
        )
        .await;
        match result {
            Ok(chat) if chat.kind == "private" => Ok(UserProfile {
                user_id: chat.id,
                username: chat.username,
                first_name: chat.first_name.unwrap_or_else(|| username.to_string()),
                last_name: chat.last_name,
                last_seen: Utc::now(),
            }),
            // Channels and groups also own usernames but are not targets.
            Ok(_) => Err(PlatformError::NotFound),
            Err(PlatformError::Api(description)) => {
                debug!("getChat @{}: {}", username, description);
                Err(PlatformError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.write().await = false;
        if let Some(handle) = self.poll_task.write().await.take() {
            handle.abort();
        }
        info!("Disconnected from Telegram");
        Ok(())
    }
}
