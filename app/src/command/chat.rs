//! Interactive multi-turn conversation.
//!
//! Every line is answered with the stored history of the user and the
//! exchange is saved right after, so a chat can be resumed later.

use talkrs_conversation::{Coalescer, ConversationError, ConversationService};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use super::{DEFAULT_CLI_USER, TerminalSink, init_common_components};

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub user: Option<String>,
    /// Wait for whole answers instead of streaming them.
    pub no_stream: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

enum Line<'a> {
    Exit,
    History,
    Reset,
    Question(&'a str),
    Empty,
}

fn classify(line: &str) -> Line<'_> {
    match line.trim() {
        "" => Line::Empty,
        "/exit" | "/quit" => Line::Exit,
        "/history" => Line::History,
        "/reset" => Line::Reset,
        question => Line::Question(question),
    }
}

async fn exchange(
    service: &ConversationService,
    coalescer: &Coalescer,
    user: &str,
    question: &str,
    stream: bool,
) -> Result<(), ConversationError> {
    let session = if stream {
        let (tokens, session) = service.contextual_stream(user, question).await?;
        coalescer.run(&TerminalSink::default(), tokens).await;
        session
    } else {
        let (answer, session) = service.contextual(user, question).await?;
        println!("{answer}");
        session
    };
    session.save().await?;
    session.close();
    Ok(())
}

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let common = init_common_components().await?;
        let service = &common.service;
        let user = input.user.as_deref().unwrap_or(DEFAULT_CLI_USER);
        let coalescer =
            Coalescer::new("").with_min_interval(common.config.stream.min_update_interval());

        info!("Starting chat for {user}");
        println!("Type /history to show the conversation, /reset to forget it, /exit to leave.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            match classify(&line) {
                Line::Empty => {}
                Line::Exit => break,
                Line::History => {
                    let session = service.open_with_history(user).await;
                    println!("{}", session.transcript().await.trim_start());
                    session.close();
                }
                Line::Reset => {
                    service.reset(user).await?;
                    println!("History cleared.");
                }
                Line::Question(question) => {
                    match exchange(service, &coalescer, user, question, !input.no_stream).await {
                        Ok(()) => {}
                        Err(e) if e.clears_context() => {
                            warn!("{e}");
                            service.reset(user).await?;
                            println!("{e}. History cleared, please ask again.");
                        }
                        Err(e) => println!("Error: {e}"),
                    }
                }
            }
        }

        info!("Chat for {user} ended");
        Ok(())
    }
}
