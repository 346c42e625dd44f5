use std::sync::Arc;

use anyhow::{Context, Result};
use stockroom_auth::{DirectoryAuthorizer, RolePolicy};
use stockroom_infra::jobs::{InMemoryJobStore, JobExecutor, JobStore};
use stockroom_infra::notify::TracingSink;
use stockroom_infra::store::{AlertStore, InMemoryStore, LedgerStore, PgStore};
use stockroom_infra::{Config, Stockroom};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    stockroom_observability::init(config.log_format);

    match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections, config.lock_timeout())
                .await
                .context("failed to connect to postgres")?;
            store.migrate().await.context("failed to run migrations")?;
            tracing::info!("connected to postgres");
            run(Arc::new(store), config).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            run(Arc::new(InMemoryStore::new(config.lock_timeout())), config).await
        }
    }
}

async fn run<S>(store: Arc<S>, config: Config) -> Result<()>
where
    S: LedgerStore + AlertStore + 'static,
{
    let authorizer = Arc::new(DirectoryAuthorizer::new(RolePolicy::standard()));
    let jobs = InMemoryJobStore::arc();
    let app = Stockroom::new(store, jobs.clone(), authorizer, &config);

    let mut executor = JobExecutor::new(jobs.clone());
    app.register_handlers(&mut executor, Arc::new(TracingSink));
    let handle = executor.spawn(config.executor_config());

    // Alerts left undelivered by a previous process are queued again here.
    if let Err(e) = app.maintain().await {
        tracing::warn!(error = %e, "startup maintenance failed");
    }
    let maintenance = config.maintenance_interval().map(|period| {
        let app = app.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = app.maintain().await {
                    tracing::warn!(error = %e, "maintenance pass failed");
                }
            }
        })
    });

    let digest = config.digest_interval().map(|period| {
        let app = app.clone();
        let jobs = jobs.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = jobs.enqueue(app.digest_job()) {
                    tracing::warn!(error = %e, "failed to schedule low-stock digest");
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    if let Some(task) = digest {
        task.abort();
    }
    if let Some(task) = maintenance {
        task.abort();
    }
    handle.shutdown().await;
    Ok(())
}
