use anyhow::Result;
use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use hushbot::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting hushbot v{}", hushbot::VERSION);

    let settings_path = env::var("HUSHBOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("hushbot.yaml"));
    let settings = Arc::new(SettingsManager::load(&settings_path).await?);
    settings.start_watcher().await?;

    let storage = {
        let snapshot = settings.current().await.storage.snapshot_path.clone();
        let storage = match snapshot {
            Some(path) => MemoryStorage::with_snapshot(path),
            None => MemoryStorage::new(),
        };
        storage.load().await?;
        Arc::new(storage)
    };

    let admin_id = match env::var("ADMIN_ID") {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("ADMIN_ID is set but not numeric, ignoring");
                None
            }
        },
        Err(_) => None,
    };
    if admin_id.is_none() {
        info!("No ADMIN_ID configured; support messages are stored only");
    }

    let bot = Arc::new(
        GuardBot::new(
            Arc::clone(&settings),
            Arc::clone(&storage) as Arc<dyn Storage>,
            admin_id,
        )
        .await,
    );

    let platform = Arc::new(TelegramConnection::new(TelegramConfig::from_env()?));
    bot.start(platform).await?;

    // Periodic snapshot so a crash loses little.
    {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = storage.persist().await {
                    warn!("Periodic snapshot failed: {}", e);
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    bot.shutdown().await;
    Ok(())
}
