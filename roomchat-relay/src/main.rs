//! `RoomChat` Relay Server -- in-memory chat room relay.
//!
//! An axum server that keeps rooms, members, and message history in
//! memory and fans chat events out over WebSocket. Nothing is persisted:
//! restarting the process discards every room.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin roomchat-relay
//!
//! # Run on a custom port, serving a front-end from ./public
//! cargo run --bin roomchat-relay -- --port 8080 --static-dir public
//!
//! # Or via environment variable
//! PORT=8080 cargo run --bin roomchat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use roomchat_relay::config::{RelayCliArgs, RelayConfig};
use roomchat_relay::relay::{self, RelayState};
use roomchat_relay::rooms::RoomRegistry;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let bind_addr = config.bind_addr();
    tracing::info!(addr = %bind_addr, static_dir = ?config.static_dir, "starting roomchat relay server");

    let state = Arc::new(RelayState::with_config(
        config.max_message_size,
        RoomRegistry::new(),
    ));

    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!(
            rooms = shutdown_state.room_count(),
            connections = shutdown_state.connection_count(),
            "shutting down"
        );
        shutdown_state.close_all_connections();
    };

    match relay::start_server_with_state(&bind_addr, state, config.static_dir, shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
            tracing::info!("relay server stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
