use anyhow::{Context, Result};
use frontdoor::config::RedirectorConfig;
use frontdoor::credentials;
use frontdoor::redirect::RedirectResponse;
use frontdoor::server;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontdoor=info".into()),
        )
        .init();

    info!("Frontdoor starting...");

    let config = RedirectorConfig::from_env().context("Invalid configuration")?;
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        mode = config.mode.name(),
        response_style = %config.response_style,
        read_timeout_secs = config.limits.read_timeout.as_secs(),
        "Configuration loaded"
    );

    // Everything that can fail fatally happens before the socket is bound
    let destination = credentials::resolve(&config)
        .await
        .context("Failed to resolve redirect destination")?;
    info!(login_url = %destination.login_url, "Redirect destination resolved");

    let response = RedirectResponse::new(
        config.response_style,
        &destination.target_url(config.encode_query),
    );

    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.bind_addr, config.port))?;
    info!(port = config.port, "Serving HTTP");

    let stats = server::serve(listener, &response, &config.limits, shutdown_signal()).await;

    info!(
        accepted = stats.accepted,
        responded = stats.responded,
        failed = stats.failed,
        "Frontdoor stopped"
    );

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // Without a signal handler the process runs until killed
            warn!(error = %e, "Failed to listen for ctrl_c signal");
            std::future::pending::<()>().await
        }
    }
}
