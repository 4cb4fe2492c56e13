//! Alpha saga coordinator server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use saga::{InMemorySagaDataRepository, OmegaRegistry, SagaRouter};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::new(&config.log_level);
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> Arc<dyn EventStore> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url)
                .await
                .expect("failed to connect to Postgres");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres saga journal");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, saga journal is kept in memory");
            Arc::new(InMemoryEventStore::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let store = open_store(&config).await;
    let registry = Arc::new(OmegaRegistry::new());
    let repository = Arc::new(InMemorySagaDataRepository::new());
    let router = SagaRouter::new(
        store,
        registry.clone(),
        repository.clone(),
        config.saga_settings(),
    );

    // Resume deadlines and retries of sagas left in the journal
    router.recover_all().await.expect("saga recovery failed");

    let state = Arc::new(AppState::new(
        router.clone(),
        registry,
        repository,
        config.command_poll_wait(),
    ));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting alpha coordinator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    router.shutdown().await;
    tracing::info!("server shut down gracefully");
}
