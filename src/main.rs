use pgschemas_gateway::api::{
    health_check, list_tenants, migrate_schemas, provision_tenant, whoami, AppState,
};
use pgschemas_gateway::config::Config;
use pgschemas_gateway::migrate::{Orchestrator, PgMigrationRunner};
use pgschemas_gateway::pool::PoolManager;
use pgschemas_gateway::registry::{RegistryHandle, TenantRegistry};
use pgschemas_gateway::routing::SchemaRoutingLayer;
use pgschemas_gateway::security::{admin_auth_middleware, AdminAuthConfig};
use pgschemas_gateway::telemetry;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::time::interval;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env must be loaded before LOG_DIR is read
    let dotenv = dotenvy::dotenv();

    let config = Config::from_env()?;
    let _log_guard = telemetry::init_tracing(config.log_dir.as_deref());

    if let Err(e) = dotenv {
        warn!("No .env file found or error loading it: {}", e);
    }
    telemetry::log_activations();

    let socket_addr = config.socket_addr()?;

    info!("Starting pgschemas gateway on {}", socket_addr);
    info!("Tenants file: {:?}", config.tenants_file);
    info!("Migrations directory: {:?}", config.migrations_dir);
    info!("Max connections: {}", config.max_connections);

    let pool = Arc::new(PoolManager::new(&config).await?);

    let registry = RegistryHandle::new(TenantRegistry::load(&config.tenants_file)?);
    if let Err(e) = registry.refresh(&pool).await {
        warn!("Initial dynamic tenant load failed: {}", e);
    }

    let runner = PgMigrationRunner::new(pool.clone(), &config.migrations_dir);
    let state = Arc::new(AppState {
        pool: pool.clone(),
        registry: registry.clone(),
        orchestrator: Orchestrator::new(runner),
        batch: config.batch_options(),
        start_time: Instant::now(),
    });

    let admin_auth = Arc::new(AdminAuthConfig::from_config(&config));
    if !admin_auth.is_enabled() {
        warn!("ADMIN_TOKEN not set; /admin endpoints will answer 503");
    }
    if admin_auth.trusted_proxies.is_empty() {
        info!("TRUSTED_PROXIES not set; admin allowlist checks the direct peer address");
    }

    let admin = Router::new()
        .route("/tenants", get(list_tenants).post(provision_tenant))
        .route("/migrate", post(migrate_schemas))
        .layer(middleware::from_fn_with_state(admin_auth, admin_auth_middleware))
        .with_state(state.clone());

    // Everything else is served as the tenant matching the host.
    let tenant = Router::new()
        .fallback(whoami)
        .layer(SchemaRoutingLayer::new(registry.clone()));

    let app = Router::new()
        .route("/health", get(health_check).with_state(state.clone()))
        .nest("/admin", admin)
        .merge(tenant)
        .layer(TraceLayer::new_for_http());

    // Dynamic tenants come and go in the tenant table
    let refresh_pool = pool.clone();
    let refresh_registry = registry.clone();
    let refresh_every = config.registry_refresh;
    tokio::spawn(async move {
        let mut interval = interval(refresh_every);
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = refresh_registry.refresh(&refresh_pool).await {
                warn!("Tenant registry refresh failed: {}", e);
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&socket_addr).await?;
    info!("Server listening on {}", socket_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
