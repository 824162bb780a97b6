use crate::{Command, Error, Result, TelegramBot};
use talkrs_config::ChatMode;
use teloxide::{requests::Requester, types::Message};
use tracing::{info, warn};

/// Handle bot commands
pub async fn handle_command(bot: TelegramBot, msg: Message, cmd: Command) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");
    info!("[@{username}] Command: {cmd:?}");

    let reply = match cmd {
        Command::Start => Command::welcome_text().to_string(),
        Command::Help => Command::help_text().to_string(),
        Command::Reset => {
            bot.reset_session(chat_id).await?;
            "对话历史已清空".to_string()
        }
        Command::Single => {
            bot.set_mode(chat_id, ChatMode::Single).await;
            "已切换到单聊模式，每条消息都会独立回答".to_string()
        }
        Command::Context => {
            bot.set_mode(chat_id, ChatMode::Context).await;
            "已切换到串聊模式，回答时会带上之前的对话".to_string()
        }
        Command::History => {
            let transcript = bot.history(chat_id).await;
            if transcript.trim().is_empty() {
                "当前没有对话历史".to_string()
            } else {
                transcript.trim_start().to_string()
            }
        }
    };

    bot.bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Handle any message (commands or regular text)
pub async fn handle_message(bot: TelegramBot, msg: Message) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());

    if !bot.is_allowed(msg.chat.id.0, username) {
        warn!("Ignoring message from unauthorized chat {}", msg.chat.id);
        return Err(Error::Unauthorized(msg.chat.id.0));
    }

    if let Some(cmd) = Command::parse_from_text(text) {
        return handle_command(bot, msg.clone(), cmd).await;
    }

    let username = username.unwrap_or("unknown");
    info!("[@{username}] Message: {text}");

    bot.bot
        .send_chat_action(msg.chat.id, teloxide::types::ChatAction::Typing)
        .await?;

    let answer = bot.answer(msg.chat.id, text).await?;
    info!("[@{username}] Answered with {} chars", answer.chars().count());

    Ok(())
}
