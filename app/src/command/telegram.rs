use crate::command::CommandStrategy;
use std::sync::Arc;
use std::time::Duration;
use talkrs_config::{Config, StorageConfig};
use talkrs_core::SessionStorage;
use talkrs_telegram::TelegramBot;
use tokio::time::sleep;
use tracing::{info, warn};

use super::{build_service, build_storage};

/// Connect to the session store with exponential backoff retry.
///
/// Delays go 1s, 2s, then 3s (capped) until the store is reachable.
async fn connect_storage_with_retry(config: &StorageConfig) -> Arc<dyn SessionStorage> {
    const MAX_DELAY: Duration = Duration::from_secs(3);
    const INITIAL_DELAY: Duration = Duration::from_secs(1);

    let mut attempt = 0u32;
    let mut delay = INITIAL_DELAY;

    loop {
        attempt += 1;
        match build_storage(config).await {
            Ok(storage) => {
                info!("Session store connected on attempt {attempt}");
                return storage;
            }
            Err(e) => {
                warn!(
                    "Failed to connect to session store (attempt {attempt}): {e}. Retrying in {}s...",
                    delay.as_secs()
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Input for Telegram bot command.
pub struct TelegramInput {
    /// Optional bot token (overrides config)
    pub token: Option<String>,
    /// Optional allowed chat IDs or usernames (overrides config)
    pub allow_from: Option<Vec<String>>,
}

/// Strategy for running Telegram bot.
pub struct TelegramStrategy;

impl CommandStrategy for TelegramStrategy {
    type Input = TelegramInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let mut config = Config::load()?;

        if !config.telegram.enabled {
            anyhow::bail!("Telegram is not enabled in config. Set \"telegram.enabled\": true");
        }
        if let Some(token) = input.token {
            config.telegram.token = token;
        }
        if let Some(allow_from) = input.allow_from {
            config.telegram.allow_from = allow_from;
        }
        if config.telegram.token.is_empty() {
            anyhow::bail!("Telegram bot token not configured. Set \"telegram.token\" in config");
        }

        info!("Starting Telegram bot...");

        let storage = connect_storage_with_retry(&config.storage).await;
        let service = Arc::new(build_service(&config, storage)?);
        let bot = TelegramBot::new(service, &config)?;

        info!("Telegram bot is running. Press Ctrl+C to stop.");
        bot.run().await?;

        Ok(())
    }
}
