//! `LineChat` -- terminal client for a `LineChat` server.
//!
//! Reads lines from stdin and sends them to the server; prints everything
//! the server relays. `/quit` leaves, `/file NAME SIZE` announces a file.
//! Logs go to a file because stdout carries the chat.

use std::io::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use linechat::auth::AuthStore;
use linechat::client::ChatClient;
use linechat::config::{CliArgs, ClientCommand, ClientConfig};
use linechat::events::{ChannelSink, ClientEvent};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > env > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file, never stdout.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let result = match cli.command.clone().unwrap_or(ClientCommand::Connect) {
        ClientCommand::Register => register(&cli, &config),
        ClientCommand::Connect => connect(&cli, &config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("linechat.log");
    let log_path = file_path.unwrap_or(&default_path);
    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn register(cli: &CliArgs, config: &ClientConfig) -> Result<(), String> {
    let username = config
        .username
        .as_deref()
        .ok_or("register needs --username")?;
    let password = cli.password.as_deref().ok_or("register needs --password")?;

    let store = AuthStore::open(&config.auth_db_path).map_err(|e| e.to_string())?;
    store
        .register(username, password)
        .map_err(|e| e.to_string())?;
    println!("Registered {username}");
    Ok(())
}

async fn connect(cli: &CliArgs, config: &ClientConfig) -> Result<(), String> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let username = match &config.username {
        Some(name) => name.clone(),
        None => {
            print!("Username: ");
            let _ = std::io::stdout().flush();
            stdin
                .next_line()
                .await
                .map_err(|e| e.to_string())?
                .ok_or("no username given")?
        }
    };

    if let Some(password) = &cli.password {
        let store = AuthStore::open(&config.auth_db_path).map_err(|e| e.to_string())?;
        if !store
            .verify(&username, password)
            .map_err(|e| e.to_string())?
        {
            return Err("invalid username or password".to_string());
        }
    }

    let (sink, mut events) = ChannelSink::new();
    let client = ChatClient::connect(config.server_addr(), &username, Arc::new(sink))
        .await
        .map_err(|e| e.to_string())?;
    println!("Connected to {} as {}", client.peer_addr(), client.username());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !print_event(&event) {
                    break;
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !handle_input(&client, line.trim_end()).await {
                    break;
                }
            }
        }
    }

    drain_events(&mut events);
    client.disconnect().await.map_err(|e| e.to_string())
}

/// Prints one event. Returns `false` when the session is over.
fn print_event(event: &ClientEvent) -> bool {
    match event {
        ClientEvent::System(text) => println!("* {text}"),
        ClientEvent::Chat { sender, text } => println!("{sender}: {text}"),
        ClientEvent::Users(users) => println!("* online: {}", users.join(", ")),
        ClientEvent::Shutdown => {
            println!("* server is shutting down");
            return false;
        }
    }
    true
}

fn drain_events(events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

/// Handles one stdin line. Returns `false` to quit.
async fn handle_input(client: &ChatClient, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if line == "/quit" {
        return false;
    }

    let result = if let Some(args) = line.strip_prefix("/file ") {
        match parse_file_command(args) {
            Some((name, size)) => client.send_file_announcement(name, size).await,
            None => {
                println!("* usage: /file NAME SIZE");
                return true;
            }
        }
    } else {
        client.send(line).await
    };

    if let Err(e) = result {
        println!("* {e}");
        return client.is_connected();
    }
    true
}

fn parse_file_command(args: &str) -> Option<(&str, u64)> {
    let (name, size) = args.trim().rsplit_once(' ')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, size.parse().ok()?))
}
