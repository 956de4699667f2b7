//! Interactive terminal chat against a running llama-relay server.
//!
//! History is kept client-side and resent with every turn. Replies stream
//! to stdout as they arrive.

use std::io::Write;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use llama_relay::chat::{ChatMessage, ChatRequest, DEFAULT_MODEL};
use llama_relay::client::{FrameHandler, RelayClient};

#[derive(Parser, Debug)]
#[command(name = "llama-chat", about = "Chat with Llama through a llama-relay server")]
struct Args {
    /// Relay server base URL.
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,

    /// Model to chat with.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Wait for the whole answer instead of streaming it.
    #[arg(long)]
    no_stream: bool,
}

/// Prints deltas as they arrive and keeps the assembled reply.
#[derive(Default)]
struct Printer {
    reply: String,
    error: Option<String>,
}

impl FrameHandler for Printer {
    fn on_chunk(&mut self, text: &str) {
        self.reply.push_str(text);
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    fn on_complete(&mut self) {
        println!();
    }

    fn on_error(&mut self, message: &str) {
        if !self.reply.is_empty() {
            println!();
        }
        self.error = Some(message.to_string());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let client = RelayClient::new(&args.server);

    println!(
        "Chatting with {}. Type 'quit' or 'exit' to end the conversation.",
        args.model
    );

    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        // EOF (Ctrl+D) ends the session like `quit`.
        let Some(input) = lines.next_line().await? else {
            println!("Goodbye!");
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            println!("Goodbye!");
            break;
        }

        history.push(ChatMessage::user(input));
        let request = ChatRequest::new(history.clone()).with_model(args.model.clone());

        let reply = if args.no_stream {
            match client.send_message(&request).await {
                Ok(response) => {
                    println!("AI: {}", response.completion_message.content);
                    Ok(response.completion_message.content)
                }
                Err(e) => Err(e.to_string()),
            }
        } else {
            print!("AI: ");
            std::io::stdout().flush()?;
            let printer = client.send_message_stream(&request, Printer::default()).await;
            match printer.error {
                None => Ok(printer.reply),
                Some(e) => Err(e),
            }
        };

        match reply {
            Ok(text) => history.push(ChatMessage::assistant(text)),
            Err(e) => {
                eprintln!("An error occurred: {e}");
                // Drop the unanswered turn so the history stays alternating.
                history.pop();
            }
        }
    }

    Ok(())
}
