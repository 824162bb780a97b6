#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

mod command;

use clap::{Parser, Subcommand};
use command::{
    AskInput, AskStrategy, ChatInput, ChatStrategy, CommandStrategy, InitStrategy, ResetInput,
    ResetStrategy, TelegramInput, TelegramStrategy, VersionStrategy,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "talkrs")]
#[command(about = "talkrs chat assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// The question
        message: String,

        /// Print the answer while it is generated
        #[arg(short, long)]
        stream: bool,

        /// Continue the stored conversation of the user
        #[arg(short, long)]
        context: bool,

        /// Conversation owner
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Chat interactively, keeping the conversation between runs
    Chat {
        /// Conversation owner
        #[arg(short, long)]
        user: Option<String>,

        /// Wait for whole answers instead of streaming them
        #[arg(long)]
        no_stream: bool,
    },
    /// Forget the stored conversation of a user
    Reset {
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Run the Telegram bot
    Telegram {
        /// Bot token (overrides config)
        #[arg(short, long)]
        token: Option<String>,

        /// Allowed chat IDs or usernames (overrides config)
        #[arg(short, long, value_delimiter = ',')]
        allow_from: Option<Vec<String>>,
    },
    /// Initialize configuration
    Init,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            message,
            stream,
            context,
            user,
        } => {
            AskStrategy
                .execute(AskInput {
                    message,
                    stream,
                    context,
                    user,
                })
                .await
        }
        Commands::Chat { user, no_stream } => {
            ChatStrategy.execute(ChatInput { user, no_stream }).await
        }
        Commands::Reset { user } => ResetStrategy.execute(ResetInput { user }).await,
        Commands::Telegram { token, allow_from } => {
            TelegramStrategy
                .execute(TelegramInput { token, allow_from })
                .await
        }
        Commands::Init => InitStrategy.execute(()).await,
        Commands::Version => VersionStrategy.execute(()).await,
    }
}
