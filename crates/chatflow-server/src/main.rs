//! # ChatFlow Server
//!
//! Realtime presence and messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chatflow
//!
//! # Run with a config file (./chatflow.toml, /etc/chatflow/chatflow.toml
//! # or ~/.config/chatflow/chatflow.toml)
//! chatflow
//!
//! # Run with environment variables
//! CHATFLOW_PORT=8080 CHATFLOW_HOST=0.0.0.0 CHATFLOW_AUTH__JWT_SECRET=... chatflow
//! ```

use anyhow::Result;
use chatflow_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatflow=debug,chatflow_server=debug,chatflow_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting ChatFlow server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
