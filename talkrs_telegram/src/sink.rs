use async_trait::async_trait;
use talkrs_core::{SinkError, StreamSink};
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::{ApiError, RequestError};

/// Longest text Telegram accepts in one message.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Shows a streamed answer by editing one message in place.
pub struct TelegramMessageSink {
    bot: Bot,
    chat_id: ChatId,
    message_id: MessageId,
}

impl TelegramMessageSink {
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            message_id,
        }
    }
}

/// The last `MAX_MESSAGE_CHARS` characters of `content`.
fn fit_message(content: &str) -> &str {
    let chars = content.chars().count();
    if chars <= MAX_MESSAGE_CHARS {
        return content;
    }
    let skip = chars - MAX_MESSAGE_CHARS;
    content
        .char_indices()
        .nth(skip)
        .map_or(content, |(offset, _)| &content[offset..])
}

#[async_trait]
impl StreamSink for TelegramMessageSink {
    async fn update(&self, content: &str, _is_final: bool) -> Result<(), SinkError> {
        if content.trim().is_empty() {
            return Ok(());
        }
        match self
            .bot
            .edit_message_text(self.chat_id, self.message_id, fit_message(content))
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(RequestError::Api(e)) => Err(SinkError::Rejected(e.to_string())),
            Err(e) => Err(SinkError::Transport(e.into())),
        }
    }
}
