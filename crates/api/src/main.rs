use std::sync::Arc;

use anyhow::Context;

use stockledger_api::app::{self, services::AppServices};
use stockledger_infra::LedgerConfig;
use stockledger_infra::ledger_store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = LedgerConfig::from_env().context("invalid configuration")?;

    let store: Arc<dyn LedgerStore> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresLedgerStore::connect(url)
                .await
                .context("failed to connect to postgres")?;
            store.ensure_schema().await.context("failed to prepare schema")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store with an empty catalog");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let services = Arc::new(
        AppServices::build(config.clone(), store)
            .await
            .context("failed to load assignments")?,
    );
    let worker = services
        .spawn_notification_worker()
        .context("failed to start notification worker")?;

    let router = app::build_app(Arc::clone(&services));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, policy = ?config.alert_policy, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    services.hub.close();
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("worker shutdown panicked")?;
    Ok(())
}
