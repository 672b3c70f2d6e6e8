use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pollserve::{Cli, Server};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Cli::parse().into_config()?;
    let mut server = Server::bind(config)?;
    let shutdown = server.shutdown_handle();

    // The engine blocks in its readiness wait; keep it off the runtime thread.
    let mut engine = tokio::task::spawn_blocking(move || server.run());

    let outcome = tokio::select! {
        joined = &mut engine => joined,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
            shutdown.shutdown();
            engine.await
        }
    };
    outcome??;

    Ok(())
}
