use anyhow::Result;
use clap::Parser;
use ployer::config::Config;
use ployer::events::EventBus;
use ployer::fleet::FleetController;
use ployer::health::HealthMonitor;
use ployer::orchestrator::Orchestrator;
use ployer::proxy::ProxyAdapter;
use ployer::reconciler::Reconciler;
use ployer::{api, db, runtime};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ployer", about = "A lightweight self-hosted PaaS orchestrator")]
struct Cli {
    #[arg(short, long, default_value = "ployer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(Config::load(&cli.config)?);

    init_tracing(&config);

    let db_pool = db::init(&config.server.database_path()).await?;
    let server_id = db::ensure_local_server(&db_pool).await?;
    tracing::info!(server_id = %server_id, "local server registered");

    let container_runtime = runtime::detect_runtime(&config.runtime.container_socket_path).await?;
    let events = Arc::new(EventBus::new(config.event_bus.subscriber_inbox_size));
    let proxy = Arc::new(ProxyAdapter::new(config.proxy.admin_url.clone()));
    let fleet = Arc::new(FleetController::new(container_runtime.clone(), proxy.clone(), config.server.base_domain.clone()));

    let orchestrator = Orchestrator::new(
        db_pool.clone(),
        events.clone(),
        container_runtime.clone(),
        fleet.clone(),
        config.clone(),
    );

    let health_monitor = Arc::new(HealthMonitor::new(
        db_pool.clone(),
        events.clone(),
        container_runtime.clone(),
        fleet.clone(),
        config.health_monitor.tick_interval_secs,
        config.health_monitor.stats_interval_secs,
        config.health_monitor.stats_retention_hours,
    ));

    let reconciler = Arc::new(Reconciler::new(
        db_pool.clone(),
        container_runtime.clone(),
        fleet.clone(),
        proxy.clone(),
        config.proxy.reconcile_interval_secs,
    ));

    tracing::info!("running boot-time reconciliation");
    reconciler.reconcile_on_boot().await?;

    tokio::spawn(health_monitor.run());
    tokio::spawn(reconciler.run_periodic());

    let state = Arc::new(ployer::AppState {
        db: db_pool,
        config: config.clone(),
        events,
        runtime: container_runtime,
        fleet,
        proxy,
        orchestrator,
    });

    let app = api::create_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "ployer listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = fmt().with_env_filter(filter);

    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
