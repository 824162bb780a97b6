use teloxide::types::BotCommand;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    Single,
    Context,
    History,
}

impl Command {
    fn all() -> Vec<BotCommand> {
        [
            ("start", "开始使用机器人"),
            ("help", "显示帮助信息"),
            ("reset", "清空对话历史"),
            ("single", "切换到单聊模式（不保留上下文）"),
            ("context", "切换到串聊模式（保留上下文）"),
            ("history", "查看当前对话历史"),
        ]
        .into_iter()
        .map(|(command, description)| BotCommand {
            command: command.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    #[must_use]
    pub fn bot_commands() -> Vec<BotCommand> {
        Self::all()
    }

    #[must_use]
    pub fn parse_from_text(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();

        // "/reset@my_bot" addresses this bot in group chats
        let command = text.split('@').next().unwrap_or(&text);

        match command {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/reset" => Some(Self::Reset),
            "/single" => Some(Self::Single),
            "/context" => Some(Self::Context),
            "/history" => Some(Self::History),
            _ => None,
        }
    }

    #[must_use]
    pub const fn help_text() -> &'static str {
        r"
🤖 talkrs Telegram Bot

命令列表:
/start   - 开始使用机器人
/help    - 显示此帮助信息
/reset   - 清空对话历史
/single  - 单聊模式，每条消息独立回答
/context - 串聊模式，回答时带上之前的对话
/history - 查看当前对话历史

直接发送消息即可开始对话！
"
    }

    #[must_use]
    pub const fn welcome_text() -> &'static str {
        r"
👋 欢迎使用 talkrs Telegram Bot！

回答会边生成边显示。
默认是单聊模式，发送 /context 可以开启连续对话。

发送 /help 查看命令列表。
"
    }
}
