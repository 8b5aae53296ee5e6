//! Terminal front end for DEBLOK chat turns.

use std::io::Write as _;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use deblok_stream::prelude::*;
use deblok_stream::vendors::openai::{DirectTransport, OpenAiClient};
use deblok_stream::RelayOptions;
use futures::StreamExt as _;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tracing::warn;

#[derive(Parser)]
#[command(name = "deblok", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat from the terminal; every stdin line is one turn. Ctrl-C stops the reply.
    Chat {
        /// Streaming endpoint URL (defaults to DEBLOK_ENDPOINT_URL)
        #[arg(long, conflicts_with = "direct")]
        endpoint: Option<String>,

        /// Call OpenAI directly instead of the app endpoint
        #[arg(long)]
        direct: bool,

        /// Session cookie forwarded to the endpoint
        #[arg(long)]
        cookie: Option<String>,

        /// Folder the turns belong to
        #[arg(long)]
        folder: Option<String>,

        /// Number of recent messages sent with each turn
        #[arg(long, default_value_t = 20)]
        history: usize,
    },
    /// Print the wire frames the relay sends for one prompt.
    Relay {
        prompt: String,
    },
    /// Print a folder title for a first exchange.
    Title {
        /// First user message
        #[arg(long)]
        user: String,

        /// First assistant reply
        #[arg(long)]
        assistant: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();

    match cli.command {
        Command::Chat {
            endpoint,
            direct,
            cookie,
            folder,
            history,
        } => {
            let transport: Arc<dyn TurnTransport> = if direct {
                Arc::new(DirectTransport::from_env()?)
            } else {
                let mut config = EndpointConfig::from_env();
                if let Some(url) = endpoint {
                    config.url = url;
                }
                if let Some(cookie) = cookie {
                    config = config.cookie(cookie);
                }
                Arc::new(EndpointTransport::new(config)?)
            };
            let mut options = SessionOptions::default().history_window(history);
            if let Some(folder) = folder {
                options = options.folder_id(folder);
            }
            chat(ChatSession::new(transport, options)?).await?;
        }
        Command::Relay { prompt } => {
            let client = OpenAiClient::from_env()?;
            let request = TurnRequest::new(vec![Message::user(prompt)]);
            let mut frames = client.relay(&request, RelayOptions::default()).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(frame) = frames.next().await {
                stdout.write_all(&frame).await?;
                stdout.flush().await?;
            }
        }
        Command::Title { user, assistant } => {
            let client = OpenAiClient::from_env()?;
            let mut request = TitleRequest::new(user);
            if let Some(assistant) = assistant {
                request = request.ai_text(assistant);
            }
            println!("{}", client.generate_title(&request).await?);
        }
    }

    Ok(())
}

async fn chat(mut session: ChatSession) -> Result<(), Box<dyn std::error::Error>> {
    let notices = session.options().notices.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() {
            prompt();
            continue;
        }

        let mut turn = session.start_turn(line)?;
        let abort = turn.abort_handle();
        loop {
            tokio::select! {
                event = turn.next_event() => match event {
                    Some(TurnEvent::Delta { text, .. }) => {
                        print!("{text}");
                        std::io::stdout().flush()?;
                    }
                    Some(TurnEvent::Finished { .. }) | None => break,
                },
                _ = tokio::signal::ctrl_c() => abort.abort(),
            }
        }

        match turn.finish().await? {
            TurnOutcome::Completed { .. } => println!(),
            TurnOutcome::Cancelled { text } if text.is_empty() => {
                println!("{}", notices.cancelled_empty)
            }
            TurnOutcome::Cancelled { .. } => println!(),
            TurnOutcome::Failed { error, .. } => {
                warn!(error = %error, "turn failed");
                println!("{}", notices.error);
            }
        }
        prompt();
    }
    Ok(())
}

fn prompt() {
    eprint!("> ");
    let _ = std::io::stderr().flush();
}
