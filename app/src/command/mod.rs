//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy with its own input type; `main`
//! dispatches to them statically.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use talkrs_config::{Config, ProviderConfig, ProviderKind, StorageBackend, StorageConfig};
use talkrs_conversation::ConversationService;
use talkrs_core::{SessionStorage, SinkError, StreamSink, default_counter};
use talkrs_providers::OpenAIProvider;
use talkrs_session::{MemorySessionStore, SessionManager};
use tracing::info;

mod ask;
mod chat;
mod init;
mod reset;
mod telegram;
mod version;

pub use ask::{AskInput, AskStrategy};
pub use chat::{ChatInput, ChatStrategy};
pub use init::InitStrategy;
pub use reset::{ResetInput, ResetStrategy};
pub use telegram::{TelegramInput, TelegramStrategy};
pub use version::VersionStrategy;

/// Identity used for CLI conversations when `--user` is not given.
pub const DEFAULT_CLI_USER: &str = "cli:default";

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// # Errors
    /// Returns an error if command execution fails.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

fn build_provider(config: &ProviderConfig) -> anyhow::Result<OpenAIProvider> {
    let mut provider = match config.kind {
        ProviderKind::OpenAi => {
            let provider =
                OpenAIProvider::new(config.api_key.clone()).with_model(config.model.clone());
            match &config.base_url {
                Some(base_url) => provider.with_base_url(base_url),
                None => provider,
            }
        }
        ProviderKind::Azure => {
            let azure = config.azure.as_ref().ok_or_else(|| {
                anyhow::anyhow!("provider.azure must be set when provider.kind is \"azure\"")
            })?;
            OpenAIProvider::azure(
                config.api_key.clone(),
                &azure.resource_name,
                azure.deployment_name.clone(),
                azure.api_version.clone(),
            )
        }
    };

    if let Some(proxy) = &config.http_proxy {
        info!("Routing upstream requests through proxy {proxy}");
        provider = provider.with_proxy(proxy)?;
    }
    Ok(provider)
}

async fn build_storage(config: &StorageConfig) -> anyhow::Result<Arc<dyn SessionStorage>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new()))
        }
        StorageBackend::Sql => {
            let url = config.database_url()?;
            Ok(Arc::new(SessionManager::new(&url).await?))
        }
    }
}

fn build_service(
    config: &Config,
    storage: Arc<dyn SessionStorage>,
) -> anyhow::Result<ConversationService> {
    let provider = build_provider(&config.provider)?;
    Ok(ConversationService::new(
        Arc::new(provider),
        storage,
        default_counter(),
        config.session.to_settings(&config.stream),
    ))
}

/// Config and service shared by the conversational commands.
pub struct CommonComponents {
    pub config: Config,
    pub service: ConversationService,
}

pub async fn init_common_components() -> anyhow::Result<CommonComponents> {
    let config = Config::load()?;
    info!("Loaded config from ~/talkrs/config.json");

    let storage = build_storage(&config.storage).await?;
    let service = build_service(&config, storage)?;
    Ok(CommonComponents { config, service })
}

/// Streams an answer to stdout, printing only what is new since the last
/// update.
#[derive(Default)]
pub struct TerminalSink {
    printed: Mutex<usize>,
}

#[async_trait]
impl StreamSink for TerminalSink {
    async fn update(&self, content: &str, is_final: bool) -> Result<(), SinkError> {
        use std::io::Write;

        let mut printed = self
            .printed
            .lock()
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        let fresh = content.get(*printed..).unwrap_or_default();
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{fresh}").map_err(|e| SinkError::Transport(e.into()))?;
        if is_final {
            writeln!(stdout).map_err(|e| SinkError::Transport(e.into()))?;
        }
        stdout
            .flush()
            .map_err(|e| SinkError::Transport(e.into()))?;
        *printed = content.len();
        Ok(())
    }
}
