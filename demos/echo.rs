//! Echo server: answers every request with its own body.
//!
//! ```text
//! cargo run --example echo                  # defaults, 127.0.0.1:8888
//! cargo run --example echo -- config.json   # { "port": 9000, "idle_timeout_seconds": 10 }
//! RUST_LOG=webcontainer=debug cargo run --example echo
//! ```
//!
//! Press Ctrl-C to stop accepting connections.

use bytes::Bytes;
use tracing_subscriber::EnvFilter;
use webcontainer::{Container, ContainerConfig, HandlerError, Request};

async fn echo(request: Request, _container: Container) -> Result<Bytes, HandlerError> {
    Ok(request.body().await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ContainerConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ContainerConfig::default(),
    };

    let container = Container::builder(echo).config(config).build()?;

    let stopper = container.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            stopper.stop();
        }
    });

    container.start().await?;
    Ok(())
}
