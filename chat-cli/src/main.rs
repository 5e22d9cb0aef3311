//! claude-chat - 终端聊天入口

mod repl;
mod terminal;

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_logic::{ChatConfig, ChatService, Model};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::repl::{ReplCommand, HELP};
use crate::terminal::TerminalSink;

/// Claude chat CLI
#[derive(Parser, Debug)]
#[command(name = "claude-chat")]
#[command(version, about = "Chat with the claude CLI, with transcripts and workspace checkpoints")]
struct Args {
    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Storage directory for transcripts, state and checkpoints
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Path to the claude executable
    #[arg(long)]
    claude_path: Option<PathBuf>,

    /// Model (default, opus, sonnet); remembered for this workspace
    #[arg(short, long)]
    model: Option<Model>,

    /// Disable workspace checkpoints
    #[arg(long, default_value = "false")]
    no_checkpoints: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Send one message and exit instead of starting the REPL
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志（stderr，不和聊天输出混在一起）
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let workspace = match args.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let mut config = ChatConfig::new(workspace);
    if let Some(storage) = args.storage {
        config.storage_dir = storage;
    }
    if let Some(claude_path) = args.claude_path {
        config.claude_path = claude_path;
    }
    config.enable_checkpoints = !args.no_checkpoints;

    info!("Workspace: {:?}", config.workspace_dir);
    info!("Storage: {:?}", config.storage_dir);

    let service = ChatService::init(config, Arc::new(TerminalSink::new())).await?;
    if let Some(model) = args.model {
        service.select_model(model).await?;
    }

    match args.message {
        Some(message) => run_turn(&service, &message).await,
        None => run_repl(&service).await?,
    }

    service.dispose().await;
    Ok(())
}

/// 发送一条消息并等待完成；Ctrl-C 取消
async fn run_turn(service: &ChatService, message: &str) {
    let handle = service.send_message(message).await;
    let mut wait = pin!(handle.wait());

    tokio::select! {
        _ = &mut wait => {}
        _ = signal::ctrl_c() => {
            service.cancel().await;
            wait.await;
        }
    }
}

async fn run_repl(service: &ChatService) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("claude-chat, model {}. Type /help for commands.", service.session_snapshot().await.selected_model);

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => break,
        };
        let Some(line) = line else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Send(message) => run_turn(service, &message).await,
            ReplCommand::New => service.new_session().await,
            ReplCommand::History => {
                let conversations = service.list_conversations().await;
                if conversations.is_empty() {
                    println!("No saved conversations.");
                }
                for entry in conversations {
                    println!(
                        "{}  {} msgs  ${:.4}  {}",
                        entry.filename, entry.message_count, entry.total_cost, entry.first_user_message
                    );
                }
            }
            ReplCommand::Load(filename) => {
                if let Err(e) = service.load_conversation(&filename).await {
                    eprintln!("{e:#}");
                }
            }
            ReplCommand::Checkpoints => {
                for checkpoint in service.checkpoints().await {
                    println!("{}  {}  {}", checkpoint.sha, checkpoint.timestamp, checkpoint.message);
                }
            }
            ReplCommand::Restore(sha) => service.restore_checkpoint(&sha).await,
            ReplCommand::Model(model) => {
                if let Err(e) = service.select_model(model).await {
                    warn!("{:#}", e);
                }
                println!("Model: {model}");
            }
            ReplCommand::Status => {
                let session = service.session_snapshot().await;
                println!(
                    "session {}  model {}  ${:.4}  tokens {} in / {} out  {} requests",
                    session.session_id.as_deref().unwrap_or("(new)"),
                    session.selected_model,
                    session.total_cost_usd,
                    session.total_tokens_input,
                    session.total_tokens_output,
                    session.request_count
                );
            }
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Empty => {}
            ReplCommand::Invalid(message) => eprintln!("{message}"),
        }
    }

    Ok(())
}
