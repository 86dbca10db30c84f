use anyhow::Context;
use tokio::sync::watch;

use escrow_ledger::app::App;
use escrow_ledger::config::AppConfig;

/// Get environment from command line args (--env or -e), default: dev
fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Outbox relay process. Escrow operations are called in-process by the
/// host that embeds [`App`]; this binary only drains the outbox.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env).context("Failed to load configuration")?;
    let _log_guard = escrow_ledger::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("BUILD_COMMIT"),
        storage = ?app_config.storage,
        "Starting escrow ledger"
    );

    let app = App::build(&app_config).await?;

    let counts = app.outbox.counts_by_status().await?;
    tracing::info!(
        pending = counts.pending,
        processing = counts.processing,
        delivered = counts.delivered,
        failed = counts.failed,
        "Outbox status"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_handle = app.poller.map(|poller| {
        tokio::spawn(async move {
            poller.run(shutdown_rx).await;
            poller.metrics().snapshot()
        })
    });
    if poller_handle.is_none() {
        tracing::warn!("Outbox poller disabled; nothing to do until shutdown");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = poller_handle {
        match handle.await {
            Ok(snapshot) => tracing::info!(?snapshot, "Outbox poller stopped"),
            Err(e) => tracing::error!(error = %e, "Outbox poller task failed"),
        }
    }

    Ok(())
}
