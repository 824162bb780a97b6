//! One question, one answer.

use talkrs_conversation::Coalescer;
use tracing::info;

use super::{DEFAULT_CLI_USER, TerminalSink, init_common_components};

#[derive(Debug, Clone)]
pub struct AskInput {
    pub message: String,
    /// Print the answer while it streams.
    pub stream: bool,
    /// Replay and extend the stored history of `user`.
    pub context: bool,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AskStrategy;

impl super::CommandStrategy for AskStrategy {
    type Input = AskInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;
        let service = &common.service;
        let user = input.user.as_deref().unwrap_or(DEFAULT_CLI_USER);
        let coalescer =
            Coalescer::new("").with_min_interval(common.config.stream.min_update_interval());

        match (input.context, input.stream) {
            (false, false) => {
                let answer = service.single(user, &input.message).await?;
                println!("{answer}");
            }
            (false, true) => {
                let tokens = service.single_stream(user, &input.message).await?;
                coalescer.run(&TerminalSink::default(), tokens).await;
            }
            (true, false) => {
                let (answer, session) = service.contextual(user, &input.message).await?;
                println!("{answer}");
                session.save().await?;
                info!("Conversation for {user} now has {} turns", session.turn_count().await);
            }
            (true, true) => {
                let (tokens, session) = service.contextual_stream(user, &input.message).await?;
                coalescer.run(&TerminalSink::default(), tokens).await;
                session.save().await?;
                info!("Conversation for {user} now has {} turns", session.turn_count().await);
            }
        }

        Ok(())
    }
}
