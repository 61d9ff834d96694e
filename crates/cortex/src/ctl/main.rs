//! cortexctl - terminal client for a Cortex server
//!
//! Chats with streamed replies, regenerates answers, and manages threads.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use cortex::client::{ChatClient, StreamOutcome};
use cortex_protocol::{Message, ThreadSummary};
use tokio_util::sync::CancellationToken;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let client = ChatClient::new(&cli.server).context("creating HTTP client")?;

    match cli.command {
        Command::Status => handle_status(&client, cli.json).await,
        Command::Chat { thread, message } => handle_chat(&client, thread, message, cli.json).await,
        Command::Regenerate { thread } => handle_regenerate(&client, &thread, cli.json).await,
        Command::Threads { command } => handle_threads(&client, command, cli.json).await,
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "cortexctl",
    author,
    version,
    about = "Terminal client for Cortex - chat, regenerate replies, manage threads."
)]
struct Cli {
    /// Cortex server URL
    #[arg(long, short = 's', default_value = DEFAULT_SERVER_URL, env = "CORTEX_SERVER_URL")]
    server: String,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check server status
    Status,

    /// Send a message and stream the reply (Ctrl-C stops the stream)
    Chat {
        /// Thread to continue; a new thread is started when omitted
        #[arg(long, short = 't')]
        thread: Option<String>,
        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Replace the last reply of a thread
    Regenerate {
        /// Thread ID
        thread: String,
    },

    /// Manage threads
    Threads {
        #[command(subcommand)]
        command: ThreadsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ThreadsCommand {
    /// List threads, most recent first
    List,
    /// Print a thread's messages
    Show {
        /// Thread ID
        id: String,
    },
    /// Rename a thread
    Rename {
        /// Thread ID
        id: String,
        /// New title
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    /// Delete a thread
    Delete {
        /// Thread ID
        id: String,
    },
}

async fn handle_status(client: &ChatClient, json: bool) -> Result<()> {
    match client.health().await {
        Ok(health) => {
            if json {
                println!("{}", serde_json::to_string(&health)?);
            } else {
                println!(
                    "Server is running at {} (version {})",
                    client.base_url(),
                    health.version
                );
            }
        }
        Err(err) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({"status": "error", "message": err.to_string()})
                );
            } else {
                println!("Server at {} is not reachable: {}", client.base_url(), err);
            }
        }
    }
    Ok(())
}

async fn handle_chat(
    client: &ChatClient,
    thread: Option<String>,
    message: Vec<String>,
    json: bool,
) -> Result<()> {
    let thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let text = message.join(" ");
    let mut view = client.load_view(&thread_id).await?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut stdout = io::stdout();
    let summary = client
        .send_message(&mut view, &thread_id, &text, &cancel, |token| {
            if !json {
                let _ = stdout.write_all(token.as_bytes());
                let _ = stdout.flush();
            }
        })
        .await;

    let reply = view
        .trailing_assistant()
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let title = summary
        .threads
        .as_ref()
        .and_then(|threads| threads.iter().find(|t| t.thread_id == thread_id))
        .map(|t| t.title.clone());

    if json {
        let outcome = match &summary.outcome {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed(_) => "failed",
            StreamOutcome::Cancelled => "cancelled",
        };
        println!(
            "{}",
            serde_json::json!({
                "threadId": thread_id,
                "title": title,
                "outcome": outcome,
                "reply": reply,
            })
        );
        return Ok(());
    }

    match summary.outcome {
        StreamOutcome::Completed => println!(),
        StreamOutcome::Cancelled => println!("\n[stopped]"),
        StreamOutcome::Failed(message) => {
            println!("\n{reply}");
            eprintln!("stream failed: {message}");
        }
    }
    match title {
        Some(title) => eprintln!("thread {thread_id} ({title})"),
        None => eprintln!("thread {thread_id}"),
    }
    Ok(())
}

async fn handle_regenerate(client: &ChatClient, thread_id: &str, json: bool) -> Result<()> {
    let mut view = client.load_view(thread_id).await?;
    let reply = client.regenerate(&mut view, thread_id).await?;
    if json {
        println!("{}", serde_json::json!({"threadId": thread_id, "reply": reply}));
    } else {
        println!("{reply}");
    }
    Ok(())
}

async fn handle_threads(client: &ChatClient, command: ThreadsCommand, json: bool) -> Result<()> {
    match command {
        ThreadsCommand::List => {
            let threads = client.list_threads().await?;
            if json {
                println!("{}", serde_json::to_string(&threads)?);
            } else {
                print_thread_table(&threads);
            }
        }
        ThreadsCommand::Show { id } => {
            let messages = client.get_thread(&id).await?;
            if json {
                println!("{}", serde_json::to_string(&messages)?);
            } else {
                print_messages(&messages);
            }
        }
        ThreadsCommand::Rename { id, title } => {
            let summary = client.rename_thread(&id, &title.join(" ")).await?;
            if json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!("Thread {} renamed to {:?}", summary.thread_id, summary.title);
            }
        }
        ThreadsCommand::Delete { id } => {
            client.delete_thread(&id).await?;
            if json {
                println!(r#"{{"status": "deleted", "threadId": "{}"}}"#, id);
            } else {
                println!("Thread {} deleted", id);
            }
        }
    }
    Ok(())
}

fn print_thread_table(threads: &[ThreadSummary]) {
    println!("{:<38} {:<32} {:>5} {:<16}", "ID", "TITLE", "MSGS", "UPDATED");
    println!("{}", "-".repeat(94));
    for thread in threads {
        println!(
            "{:<38} {:<32} {:>5} {:<16}",
            thread.thread_id,
            thread.title.chars().take(32).collect::<String>(),
            thread.message_count,
            format_millis(thread.updated_at),
        );
    }
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        println!("[{}]", message.role);
        println!("{}\n", message.content);
    }
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
