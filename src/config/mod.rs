// src/config/mod.rs - Settings file management with hot reload

use anyhow::{Context, Result};
use log::{error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{Duration, Instant};

/// Keyword phrases the command interpreter anchors on. A phrase may contain
/// spaces; a space matches any whitespace run in the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandKeywords {
    pub stop_phrase: String,
    pub all_qualifier: String,
    pub list_phrase: String,
    pub mine_qualifier: String,
    pub top_phrase: String,
}

impl Default for CommandKeywords {
    fn default() -> Self {
        Self {
            stop_phrase: "хаш стоп".to_string(),
            all_qualifier: "все".to_string(),
            list_phrase: "хаш список".to_string(),
            mine_qualifier: "мои".to_string(),
            top_phrase: "хаш топ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeSettings {
    /// Fallback when neither a personal notice nor an autoresponder is set.
    pub default_notice: String,
    /// How long the substitute notice stays in the chat before auto-delete.
    pub delete_after_secs: u64,
}

impl Default for NoticeSettings {
    fn default() -> Self {
        Self {
            default_notice: "Пользователь установил ограничение на ответы к своим сообщениям."
                .to_string(),
            delete_after_secs: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Upper bound on a deferred username lookup against the platform.
    pub fetch_timeout_ms: u64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 2500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportSettings {
    pub cooldown_secs: u64,
}

impl Default for SupportSettings {
    fn default() -> Self {
        Self { cooldown_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("hushbot-state.json")),
        }
    }
}

/// Everything the bot reads from its YAML settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub commands: CommandKeywords,
    /// Closed vocabulary for the lexicon scan, one entry per word.
    pub vocabulary: Vec<String>,
    pub notices: NoticeSettings,
    pub resolver: ResolverSettings,
    pub support: SupportSettings,
    pub storage: StorageSettings,
}

/// Broadcast when the settings file changes on disk.
#[derive(Debug, Clone)]
pub enum SettingsEvent {
    Reloaded,
    Invalid { error: String },
}

/// Loads the settings file and hot-reloads it when it changes, broadcasting
/// events so dependent subsystems (lexicon, interpreter) can rebuild.
pub struct SettingsManager {
    path: PathBuf,
    current: RwLock<Arc<Settings>>,
    change_tx: broadcast::Sender<SettingsEvent>,
    watcher: RwLock<Option<RecommendedWatcher>>,
    last_reload: RwLock<Instant>,
}

impl SettingsManager {
    /// Read settings from `path`. A missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let settings = match Self::read_file(path).await {
            Ok(settings) => settings,
            Err(e) if path.exists() => return Err(e),
            Err(_) => {
                info!(
                    "No settings file at {}, running with defaults",
                    path.display()
                );
                Settings::default()
            }
        };
        let (change_tx, _) = broadcast::channel(16);
        Ok(Self {
            path: path.to_path_buf(),
            current: RwLock::new(Arc::new(settings)),
            change_tx,
            watcher: RwLock::new(None),
            last_reload: RwLock::new(Instant::now()),
        })
    }

    /// Wrap an already-built `Settings`, without a backing file. Reload and
    /// watching are inert; used for embedding and tests.
    pub fn with_settings(settings: Settings) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path: PathBuf::new(),
            current: RwLock::new(Arc::new(settings)),
            change_tx,
            watcher: RwLock::new(None),
            last_reload: RwLock::new(Instant::now()),
        }
    }

    async fn read_file(path: &Path) -> Result<Settings> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Cheap snapshot of the current settings.
    pub async fn current(&self) -> Arc<Settings> {
        Arc::clone(&*self.current.read().await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsEvent> {
        self.change_tx.subscribe()
    }

    /// Watch the settings file and reload it on modification.
    pub async fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(16);
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to forward settings watch event: {}", e);
                    }
                }
            })?;

        let watch_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
        *self.watcher.write().await = Some(watcher);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                if !event.paths.iter().any(|p| p.ends_with(
                    manager
                        .path
                        .file_name()
                        .unwrap_or_default(),
                )) {
                    continue;
                }
                // Debounce rapid consecutive writes from editors.
                {
                    let now = Instant::now();
                    let mut last = manager.last_reload.write().await;
                    if now.duration_since(*last) < Duration::from_millis(500) {
                        continue;
                    }
                    *last = now;
                }
                manager.reload().await;
            }
        });
        info!("Watching {} for settings changes", self.path.display());
        Ok(())
    }

    async fn reload(&self) {
        match Self::read_file(&self.path).await {
            Ok(settings) => {
                *self.current.write().await = Arc::new(settings);
                info!("Settings reloaded from {}", self.path.display());
                let _ = self.change_tx.send(SettingsEvent::Reloaded);
            }
            Err(e) => {
                warn!("Settings file changed but failed to reload: {:#}", e);
                let _ = self.change_tx.send(SettingsEvent::Invalid {
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::load(&dir.path().join("nope.yaml"))
            .await
            .unwrap();
        let settings = manager.current().await;
        assert_eq!(settings.notices.delete_after_secs, 12);
        assert!(settings.vocabulary.is_empty());
    }

    #[tokio::test]
    async fn partial_yaml_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hushbot.yaml");
        tokio::fs::write(
            &path,
            "commands:\n  stop_phrase: \"бот стоп\"\nvocabulary:\n  - бля\n",
        )
        .await
        .unwrap();

        let manager = SettingsManager::load(&path).await.unwrap();
        let settings = manager.current().await;
        assert_eq!(settings.commands.stop_phrase, "бот стоп");
        assert_eq!(settings.commands.all_qualifier, "все");
        assert_eq!(settings.vocabulary, vec!["бля".to_string()]);
        assert_eq!(settings.support.cooldown_secs, 30);
    }

    #[tokio::test]
    async fn broken_yaml_is_an_error_when_the_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hushbot.yaml");
        tokio::fs::write(&path, ":: not yaml ::").await.unwrap();
        assert!(SettingsManager::load(&path).await.is_err());
    }
}
