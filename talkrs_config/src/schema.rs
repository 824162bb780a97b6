use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use talkrs_conversation::{ContextOptions, SessionSettings};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Azure,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub api_key: String,
    #[serde(default = "ProviderConfig::default_model")]
    pub model: String,
    /// Service root without the `/v1` suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureConfig>,
}

impl ProviderConfig {
    fn default_model() -> String {
        "gpt-3.5-turbo".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AzureConfig {
    pub resource_name: String,
    pub deployment_name: String,
    #[serde(default = "AzureConfig::default_api_version")]
    pub api_version: String,
}

impl AzureConfig {
    fn default_api_version() -> String {
        "2023-05-15".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_question_len: usize,
    pub max_answer_len: usize,
    pub max_text_len: usize,
    pub timeout_secs: u64,
    pub max_turn_count: usize,
    pub maintain_turn_count: bool,
    pub enforce_text_budget: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Text printed ahead of the history in transcripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub human_role: String,
    pub ai_role: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            max_question_len: settings.max_question_len,
            max_answer_len: settings.max_answer_len,
            max_text_len: settings.max_text_len,
            timeout_secs: settings.timeout.as_secs(),
            max_turn_count: settings.context.max_turn_count,
            maintain_turn_count: settings.context.maintain_turn_count,
            enforce_text_budget: settings.enforce_text_budget,
            system_prompt: None,
            preset: None,
            human_role: settings.context.human_role,
            ai_role: settings.context.ai_role,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn to_settings(&self, stream: &StreamConfig) -> SessionSettings {
        let mut context = ContextOptions::default()
            .with_max_turn_count(self.max_turn_count)
            .with_maintain_turn_count(self.maintain_turn_count);
        if let Some(prompt) = &self.system_prompt {
            context = context.with_background(prompt.clone());
        }
        if let Some(preset) = &self.preset {
            context = context.with_preset(preset.clone());
        }
        context.human_role.clone_from(&self.human_role);
        context.ai_role.clone_from(&self.ai_role);

        SessionSettings {
            channel_capacity: stream.channel_capacity,
            ..SessionSettings::default()
        }
        .with_budgets(
            self.max_question_len,
            self.max_answer_len,
            self.max_text_len,
        )
        .with_timeout(Duration::from_secs(self.timeout_secs))
        .with_enforce_text_budget(self.enforce_text_budget)
        .with_context(context)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub min_update_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 300,
            channel_capacity: 10,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sql,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database URL; a `SQLite` file in the config directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StorageConfig {
    pub fn database_url(&self) -> anyhow::Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let path = Config::ensure_config_dir()?.join("sessions.db");
        Ok(format!("sqlite://{}?mode=rwc", path.display()))
    }
}

/// How a chat front end treats follow-up messages.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Every message stands alone.
    #[default]
    Single,
    /// History is kept per user between messages.
    Context,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    /// Allowed user ids or usernames; empty allows everyone.
    pub allow_from: Vec<String>,
    pub default_mode: ChatMode,
}

const CONFIG_TEMPLATE: &str = r#"{
  "provider": {
    "kind": "openai",
    "api_key": "your-api-key-here",
    "model": "gpt-3.5-turbo"
  },
  "session": {
    "max_question_len": 2048,
    "max_answer_len": 2048,
    "max_text_len": 4096,
    "timeout_secs": 600,
    "max_turn_count": 1000,
    "maintain_turn_count": false,
    "enforce_text_budget": false,
    "system_prompt": "You are a helpful assistant. Answer clearly and concisely.",
    "human_role": "Human",
    "ai_role": "AI"
  },
  "stream": {
    "min_update_interval_ms": 300,
    "channel_capacity": 10
  },
  "storage": {
    "backend": "sql"
  },
  "telegram": {
    "enabled": false,
    "token": "your-telegram-bot-token",
    "allow_from": [],
    "default_mode": "single"
  }
}"#;

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("talkrs"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'talkrs init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your API key");
        println!("   2. For Azure OpenAI set provider.kind to \"azure\" and fill provider.azure");
        println!("   3. Run 'talkrs chat' to start a conversation");
        println!();
        println!("🔧 Configuration options:");
        println!("   - session.max_*_len: token budgets for question, answer and whole text");
        println!("   - session.maintain_turn_count: drop the oldest turn instead of refusing");
        println!("   - stream.min_update_interval_ms: minimum gap between streamed edits");
        println!("   - storage.backend: \"sql\" (persistent) or \"memory\"");
        println!();
        Ok(())
    }
}
