mod api;
mod config;
mod db;
mod janitor;
mod runner;

use api::AppState;
use config::ServerConfig;
use db::execution::{PgExecutionStore, PgLogSink};
use db::job::PgJobStore;
use db::usage::{PgLimitSource, PgUsageStore};
use db::workflow::{PgSnapshotStore, PgWorkflowStore};
use flowline_admission::{AdmissionController, LimitCache};
use flowline_engine::{Engine, VersionManager, Worker, WorkerConfig};
use flowline_execution::{ExecutionStore, LogSink};
use flowline_queue::JobStore;
use flowline_workflow::{SnapshotStore, WorkflowStore};
use janitor::Janitor;
use runner::GraphWalkRunner;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("loaded configuration");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let workflows: Arc<dyn WorkflowStore> = Arc::new(PgWorkflowStore::new(pool.clone()));
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(PgSnapshotStore::new(pool.clone()));
    let executions: Arc<dyn ExecutionStore> = Arc::new(PgExecutionStore::new(pool.clone()));
    let logs: Arc<dyn LogSink> = Arc::new(PgLogSink::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));

    let usage = Arc::new(PgUsageStore::new(pool.clone()));
    let limit_source = Arc::new(PgLimitSource::new(
        pool.clone(),
        config.admission.default_monthly_executions,
    ));
    let limit_cache = LimitCache::new(
        limit_source,
        chrono::Duration::seconds(config.admission.limit_cache_ttl_seconds),
    );
    let admission = AdmissionController::with_ceiling(
        jobs.clone(),
        usage,
        limit_cache,
        config.admission.max_active_jobs,
    );

    let engine = Arc::new(Engine::new(
        workflows.clone(),
        executions.clone(),
        jobs.clone(),
        admission,
    ));
    let versions = Arc::new(VersionManager::new(workflows.clone(), snapshots.clone()));

    // Worker pool with a shared shutdown signal.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner: Arc<dyn flowline_engine::WorkflowRunner> = Arc::new(GraphWalkRunner::new());
    let worker_config = WorkerConfig {
        idle_wait: Duration::from_millis(config.workers.idle_wait_ms),
        ..WorkerConfig::default()
    };
    let mut worker_handles = Vec::with_capacity(config.workers.count);
    for i in 0..config.workers.count {
        let worker = Worker::new(
            format!("worker-{i}"),
            jobs.clone(),
            executions.clone(),
            snapshots.clone(),
            logs.clone(),
            runner.clone(),
            worker_config.clone(),
        );
        let rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    let janitor = Janitor::new(
        jobs.clone(),
        executions.clone(),
        logs.clone(),
        Duration::from_secs(config.janitor.interval_seconds),
    );
    tokio::spawn(async move { janitor.run().await });

    let state = AppState {
        workflows,
        snapshots,
        executions,
        jobs,
        logs,
        engine,
        versions,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    // Drain the worker pool before exiting.
    let _ = shutdown_tx.send(true);
    for handle in worker_handles {
        let _ = handle.await;
    }
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
