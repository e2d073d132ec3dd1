//! pgschemas gateway
//!
//! Schema-per-tenant PostgreSQL: tracks which tenant schema is active for
//! the current task, notifies subscribers on every activation, routes HTTP
//! requests to tenants by host and folder, and migrates many tenant
//! schemas in one batch.

pub mod api;
pub mod config;
pub mod error;
pub mod migrate;
pub mod pool;
pub mod registry;
pub mod routing;
pub mod schema;
pub mod security;
pub mod telemetry;

pub use error::{Result, TenancyError};
pub use schema::Schema;
