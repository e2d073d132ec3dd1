mod admin;
mod health;
mod tenant;

pub use admin::{list_tenants, migrate_schemas, provision_tenant};
pub use health::health_check;
pub use tenant::whoami;

use crate::migrate::{BatchOptions, Orchestrator, PgMigrationRunner};
use crate::pool::PoolManager;
use crate::registry::RegistryHandle;
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the health and admin handlers.
pub struct AppState {
    pub pool: Arc<PoolManager>,
    pub registry: RegistryHandle,
    pub orchestrator: Orchestrator<PgMigrationRunner>,
    /// Batch options used when a request does not give its own.
    pub batch: BatchOptions,
    pub start_time: Instant,
}
