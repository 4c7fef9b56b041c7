use anyhow::Context;

use stockwire_api::config::ServerConfig;
use stockwire_events::Notifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockwire_observability::init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let notifier = Notifier::start(config.notifier.clone()).context("failed to start notifier")?;

    let app = stockwire_api::app::build_app(notifier.clone());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    // Streams only end once the notifier has released their writers.
    let teardown = notifier.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            teardown.shutdown().await;
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
