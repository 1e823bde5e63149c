//! Chat Relay Server
//!
//! Entry point for the chat relay HTTP service.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use chat_relay::{config::AppConfig, server, telemetry};
use dotenvy::dotenv;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    telemetry::init(config.log.json);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    server::start_server(Arc::new(config)).await
}
