use crate::{Error, Result, TelegramMessageSink};
use std::{collections::HashMap, sync::Arc, time::Duration};
use talkrs_config::{ChatMode, Config};
use talkrs_conversation::{Coalescer, ConversationError, ConversationService};
use talkrs_core::StreamSink;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

const THINKING_PLACEHOLDER: &str = "稍等，让我想一想……";

fn allowed(allow_from: &[String], chat_id: i64, username: Option<&str>) -> bool {
    allow_from.is_empty()
        || allow_from.iter().any(|entry| {
            entry.parse::<i64>().is_ok_and(|id| id == chat_id)
                || username.is_some_and(|name| entry.trim_start_matches('@') == name)
        })
}

/// Show a failed exchange on the card. Budget failures also drop the stored
/// history so the next message starts fresh.
async fn report_failure(
    service: &ConversationService,
    key: &str,
    sink: &dyn StreamSink,
    error: ConversationError,
) -> String {
    warn!("Exchange for {key} rejected: {error}");

    let mut text = format!("❌ {error}");
    if error.clears_context() {
        match service.reset(key).await {
            Ok(()) => text.push_str("\n已清空对话历史，请重新提问。"),
            Err(e) => warn!("Failed to clear context for {key}: {e}"),
        }
    }
    if let Err(e) = sink.update(&text, true).await {
        warn!("Failed to show error for {key}: {e}");
    }
    text
}

/// Telegram front end for the conversation service.
#[derive(Clone)]
pub struct TelegramBot {
    pub bot: Bot,
    service: Arc<ConversationService>,
    /// Per-chat mode; chats not in the map use `default_mode`.
    modes: Arc<Mutex<HashMap<i64, ChatMode>>>,
    default_mode: ChatMode,
    min_update_interval: Duration,
    allow_from: Vec<String>,
}

impl TelegramBot {
    pub fn new(service: Arc<ConversationService>, config: &Config) -> Result<Self> {
        if config.telegram.token.is_empty() {
            return Err(Error::Config("telegram.token is empty".to_string()));
        }

        Ok(Self {
            bot: Bot::new(config.telegram.token.clone()),
            service,
            modes: Arc::new(Mutex::new(HashMap::new())),
            default_mode: config.telegram.default_mode,
            min_update_interval: config.stream.min_update_interval(),
            allow_from: config.telegram.allow_from.clone(),
        })
    }

    /// Allowed when the list is empty or names the chat id or username.
    #[must_use]
    pub fn is_allowed(&self, chat_id: i64, username: Option<&str>) -> bool {
        allowed(&self.allow_from, chat_id, username)
    }

    fn user_key(chat_id: i64) -> String {
        format!("telegram:{chat_id}")
    }

    pub async fn mode(&self, chat_id: i64) -> ChatMode {
        self.modes
            .lock()
            .await
            .get(&chat_id)
            .copied()
            .unwrap_or(self.default_mode)
    }

    pub async fn set_mode(&self, chat_id: i64, mode: ChatMode) {
        self.modes.lock().await.insert(chat_id, mode);
    }

    pub async fn reset_session(&self, chat_id: i64) -> Result<()> {
        self.service.reset(&Self::user_key(chat_id)).await?;
        Ok(())
    }

    pub async fn history(&self, chat_id: i64) -> String {
        let session = self.service.open_with_history(&Self::user_key(chat_id)).await;
        let transcript = session.transcript().await;
        session.close();
        transcript
    }

    /// Answer `question` in a reply that is edited while the answer streams.
    pub async fn answer(&self, chat_id: ChatId, question: &str) -> Result<String> {
        let key = Self::user_key(chat_id.0);
        let header = format!("**{question}**\n\n");
        let card = self
            .bot
            .send_message(chat_id, format!("{header}{THINKING_PLACEHOLDER}"))
            .await?;
        let sink = TelegramMessageSink::new(self.bot.clone(), chat_id, card.id);
        let coalescer = Coalescer::new(header).with_min_interval(self.min_update_interval);

        match self.mode(chat_id.0).await {
            ChatMode::Single => match self.service.single_stream(&key, question).await {
                Ok(tokens) => Ok(coalescer.run(&sink, tokens).await),
                Err(e) => Ok(report_failure(&self.service, &key, &sink, e).await),
            },
            ChatMode::Context => match self.service.contextual_stream(&key, question).await {
                Ok((tokens, session)) => {
                    let answer = coalescer.run(&sink, tokens).await;
                    if let Err(e) = session.save().await {
                        warn!("Failed to save context for {key}: {e}");
                    }
                    session.close();
                    Ok(answer)
                }
                Err(e) => Ok(report_failure(&self.service, &key, &sink, e).await),
            },
        }
    }

    /// Test connection to Telegram API with linear backoff retry.
    /// Starts at 2s, increases by 2s each attempt, max 10s delay.
    async fn test_connection(&self) {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(me) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        me.user
                            .username
                            .unwrap_or_else(|| "no username".to_string()),
                        me.user.id
                    );
                    return;
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);
                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");
                    if attempt == 1 {
                        warn!("Check the bot token and that api.telegram.org is reachable");
                    }
                    sleep(Duration::from_secs(delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        self.test_connection().await;
        if let Err(e) = self.bot.set_my_commands(crate::Command::bot_commands()).await {
            warn!("Failed to register bot commands: {e}");
        }

        let bot = self.bot.clone();
        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let this = self.clone();
            move |msg: Message| {
                let this = this.clone();
                async move { crate::handler::handle_message(this, msg).await }
            }
        }));

        info!("Telegram bot started");
        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}
