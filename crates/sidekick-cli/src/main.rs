use std::io::Write;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sidekick",
    version,
    about = "Terminal client for the Sidekick agent service"
)]
struct Cli {
    /// Base URL of a running sidekick-server.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message and print the reply.
    Chat(ChatArgs),
    /// Print the recorded conversation for a thread.
    History(HistoryArgs),
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Message to send.
    message: String,

    /// Thread to continue; a new one is created when omitted.
    #[arg(long)]
    thread: Option<String>,

    /// Print tokens as they are generated instead of waiting for the turn.
    #[arg(long)]
    stream: bool,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// Thread id to fetch.
    thread: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Chat(args) if args.stream => stream_chat(&client, &cli.url, args).await,
        Command::Chat(args) => invoke_chat(&client, &cli.url, args).await,
        Command::History(args) => show_history(&client, &cli.url, args).await,
    }
}

async fn invoke_chat(client: &reqwest::Client, base: &str, args: ChatArgs) -> Result<()> {
    let body = json!({"message": args.message, "thread_id": args.thread});
    let response = client
        .post(format!("{base}/invoke"))
        .json(&body)
        .send()
        .await
        .context("could not reach the server")?
        .error_for_status()?;

    let reply: Value = response.json().await?;
    println!("{}", reply["content"].as_str().unwrap_or_default());
    Ok(())
}

async fn stream_chat(client: &reqwest::Client, base: &str, args: ChatArgs) -> Result<()> {
    let body = json!({
        "message": args.message,
        "thread_id": args.thread,
        "stream_tokens": true,
    });
    let response = client
        .post(format!("{base}/stream"))
        .json(&body)
        .send()
        .await
        .context("could not reach the server")?
        .error_for_status()?;

    let mut events = response.bytes_stream().eventsource();
    let mut printed_tokens = false;

    while let Some(event) = events.next().await {
        let event = event.context("stream decode failure")?;
        if event.data == "[DONE]" {
            break;
        }

        let value: Value =
            serde_json::from_str(&event.data).context("malformed stream event")?;
        match value["type"].as_str() {
            Some("token") => {
                print!("{}", value["content"].as_str().unwrap_or_default());
                std::io::stdout().flush()?;
                printed_tokens = true;
            }
            Some("message") => {
                let message = &value["content"];
                match message["type"].as_str() {
                    Some("tool") => {
                        if printed_tokens {
                            println!();
                            printed_tokens = false;
                        }
                        println!("[tool] {}", message["content"].as_str().unwrap_or_default());
                    }
                    Some("ai") if !printed_tokens => {
                        let content = message["content"].as_str().unwrap_or_default();
                        if !content.is_empty() {
                            println!("{content}");
                        }
                    }
                    _ => {}
                }
            }
            Some("error") => {
                eprintln!("error: {}", value["content"].as_str().unwrap_or_default());
            }
            _ => {}
        }
    }

    if printed_tokens {
        println!();
    }
    Ok(())
}

async fn show_history(client: &reqwest::Client, base: &str, args: HistoryArgs) -> Result<()> {
    let response = client
        .get(format!("{base}/history/{}", args.thread))
        .send()
        .await
        .context("could not reach the server")?
        .error_for_status()?;

    let payload: Value = response.json().await?;
    for message in payload["messages"].as_array().into_iter().flatten() {
        let kind = message["type"].as_str().unwrap_or("?");
        println!("{kind:>5}: {}", message["content"].as_str().unwrap_or_default());
    }
    Ok(())
}
