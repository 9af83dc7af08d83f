mod commands;
mod profile;
mod prompt;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tether::providers::factory::ProviderType;

#[derive(Parser)]
#[command(author, version, about = "Drive a language model against external tool providers", long_about = None)]
struct Cli {
    /// Inference provider
    #[arg(short = 'P', long)]
    #[arg(value_enum)]
    provider: Option<CliProviderVariant>,

    /// API key (defaults to the provider's environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Override the provider host
    #[arg(long)]
    host: Option<String>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Tool provider command to spawn over stdio, e.g. "tether serve".
    /// May be given multiple times.
    #[arg(long = "tool-server")]
    tool_servers: Vec<String>,

    /// Tool provider TCP address to connect to. May be given multiple times.
    #[arg(long = "tool-server-tcp")]
    tool_server_addrs: Vec<String>,

    /// Named profile from ~/.config/tether/profiles.yaml
    #[arg(long)]
    profile: Option<String>,

    /// Fixed system instruction, replacing the generated one
    #[arg(long)]
    system: Option<String>,

    /// Abort a reply after this many model turns
    #[arg(long)]
    max_turns: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CliProviderVariant {
    OpenAi,
    DeepSeek,
}

impl From<CliProviderVariant> for ProviderType {
    fn from(variant: CliProviderVariant) -> Self {
        match variant {
            CliProviderVariant::OpenAi => ProviderType::OpenAi,
            CliProviderVariant::DeepSeek => ProviderType::DeepSeek,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session
    Session {
        /// Record under a fixed session name instead of a generated one
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Send a single message, print the reply, and exit
    Run {
        /// The user message
        #[arg(short, long)]
        message: String,
    },
    /// Expose the built-in demo toolkit to a driver over stdio
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    // Logs go to stderr: in serve mode stdout carries protocol frames.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Serve) => commands::serve::execute().await,
        Some(Command::Run { ref message }) => {
            let message = message.clone();
            let mut session = commands::session::build_session(&cli, None).await?;
            session.headless_start(message).await
        }
        Some(Command::Session { ref name }) => {
            let name = name.clone();
            let mut session = commands::session::build_session(&cli, name).await?;
            session.start().await
        }
        None => {
            let mut session = commands::session::build_session(&cli, None).await?;
            session.start().await
        }
    }
}
