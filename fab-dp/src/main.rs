//! fab-dp - Design Pipeline Microservice
//!
//! Carries a design record through generation, vision analysis, 3D preview,
//! and manufacturing file delivery, enforcing per-user quota and absorbing
//! flaky remote capabilities behind a bounded retry policy.

use anyhow::Result;
use fab_common::config::{self, TomlConfig};
use fab_common::events::EventBus;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fab_dp::capabilities::Capabilities;
use fab_dp::entitlement::EntitlementGate;
use fab_dp::pipeline::PipelineOrchestrator;
use fab_dp::retry::RetryPolicy;
use fab_dp::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // CLI: optional data-dir override as the only positional argument
    let data_dir_arg = std::env::args().nth(1);

    let toml_config = TomlConfig::load(None)?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(toml_config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting fab-dp (Design Pipeline) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve and prepare the data directory
    let data_dir = config::resolve_data_dir(data_dir_arg.as_deref(), &toml_config);
    config::ensure_data_dir(&data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize data directory: {}", e))?;

    let db_path = data_dir.join("fab.db");
    info!("Database: {}", db_path.display());

    let db_pool = fab_dp::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Designs stranded in-flight by a previous run are rewound to their
    // pre-stage state so their stages can be re-triggered
    let recovered = fab_dp::db::designs::recover_interrupted(&db_pool).await?;
    if recovered > 0 {
        info!(recovered, "Recovered interrupted designs");
    }

    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    let capabilities = Capabilities::http(&toml_config.capabilities);
    let gate = EntitlementGate::new(db_pool.clone());
    let orchestrator = PipelineOrchestrator::new(
        db_pool.clone(),
        event_bus.clone(),
        capabilities,
        gate,
        RetryPolicy::capability(&toml_config.retry),
    );

    let state = AppState::new(db_pool, event_bus, orchestrator);
    let app = fab_dp::build_router(state);

    let bind = toml_config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
