use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use onboard::config::DEFAULT_PORT;
use onboard::{app, initialize_state, telemetry, user};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::setup_tracing();

    let state = initialize_state().await?;

    if let Some(every) = state.config.token.purge_interval()? {
        user::sweeper::spawn(Arc::clone(&state.accounts), every);
    }

    let addr = SocketAddr::from((
        Ipv4Addr::UNSPECIFIED,
        state.config.port.unwrap_or(DEFAULT_PORT),
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
