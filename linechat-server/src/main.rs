//! `LineChat` server -- multi-client TCP line chat.
//!
//! Accepts clients on one port, relays their lines to everyone connected,
//! and keeps the history in SQLite under that port. The non-`serve`
//! subcommands inspect or export the stored history and exit.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the default port (12345)
//! cargo run --bin linechat-server
//!
//! # Serve on a custom port with a custom database
//! cargo run --bin linechat-server -- --port 6000 --db ./chat.db
//!
//! # Export the history of port 6000
//! cargo run --bin linechat-server -- --port 6000 export --output history.txt
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use linechat_server::config::{ServerCliArgs, ServerCommand, ServerConfig};
use linechat_server::export::ExportOptions;
use linechat_server::server::{ChatServer, ServerOptions, StoreSource};
use linechat_server::store::{ChatStore, MessageRecord, StoreError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command.clone().unwrap_or(ServerCommand::Serve) {
        ServerCommand::Serve => serve(&config).await,
        command => match run_offline(&config, command) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn serve(config: &ServerConfig) -> ExitCode {
    let store = match ChatStore::open(&config.db_path) {
        Ok(store) => StoreSource::Shared(Arc::new(store)),
        Err(e) => {
            tracing::warn!(
                path = %config.db_path.display(),
                error = %e,
                "chat store unavailable, running without persistence"
            );
            StoreSource::Disabled
        }
    };

    let mut server = ChatServer::new(ServerOptions {
        grace_period: config.grace_period,
        store,
        ..ServerOptions::default()
    });

    match server.start(config.port).await {
        Ok(addr) => tracing::info!(addr = %addr, "accepting clients, Ctrl-C to stop"),
        Err(e) => {
            tracing::error!(error = %e, "failed to start chat server");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
    tracing::info!("stopping");
    server.stop().await;
    ExitCode::SUCCESS
}

fn run_offline(config: &ServerConfig, command: ServerCommand) -> Result<(), StoreError> {
    let store = ChatStore::open(&config.db_path)?;
    let port = config.port;

    match command {
        ServerCommand::Serve => {}
        ServerCommand::Export {
            output,
            keyword,
            no_cipher,
        } => {
            let options = ExportOptions {
                include_cipher: !no_cipher,
            };
            let count = store.export_to_file(&output, port, keyword.as_deref(), options)?;
            println!("Exported {count} messages to {}", output.display());
        }
        ServerCommand::Stats => {
            let stats = store.port_stats(port)?;
            println!("Port {port}");
            println!("  Messages:     {}", stats.message_count);
            println!("  Users:        {}", stats.distinct_users);
            println!("  Connects:     {}", stats.connects);
            println!("  Disconnects:  {}", stats.disconnects);
            let active = store.active_users(port)?;
            if !active.is_empty() {
                println!("  Active:       {}", active.join(", "));
            }
            for user in store.user_stats(port)? {
                println!(
                    "  {}: {} messages, {} connections, last login {}",
                    user.username,
                    user.message_count,
                    user.connection_count,
                    user.last_login.as_deref().unwrap_or("never"),
                );
            }
        }
        ServerCommand::Search { keyword } => {
            print_messages(&store.search_messages(port, &keyword)?);
        }
        ServerCommand::Recent { limit } => {
            print_messages(&store.recent_messages(port, limit)?);
        }
        ServerCommand::Purge { yes } => {
            if !yes {
                println!("Refusing to delete history for port {port} without --yes");
                return Ok(());
            }
            let summary = store.delete_all_for_port(port)?;
            println!("Deleted {} rows for port {port}", summary.total());
        }
    }
    Ok(())
}

fn print_messages(messages: &[MessageRecord]) {
    if messages.is_empty() {
        println!("(no messages)");
    }
    for msg in messages {
        println!("[{}] {}: {}", msg.timestamp, msg.sender, msg.plaintext);
    }
}
