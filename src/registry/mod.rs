//! Tenant Registry
//!
//! Knows every schema the gateway may activate: the shared `public` schema,
//! static tenants declared in the tenants file, the optional clone reference,
//! and dynamic tenants loaded from the tenant table.
//!
//! Tenants file layout:
//! ```json
//! {
//!   "public":  { "migrations": "public" },
//!   "default": { "tenant_table": "tenants", "domain_table": "domains",
//!                "clone_reference": "sample", "migrations": "tenant" },
//!   "tenants": { "www": { "domains": ["localhost"] } },
//!   "extra_search_paths": ["extensions"]
//! }
//! ```

mod domains;
mod selector;
mod tenants;

pub use domains::DomainRecord;
pub use selector::{MigrationTargetSet, SchemaSelection, Selector};
pub use tenants::{
    DynamicTenantsConfig, PublicConfig, RegistryHandle, SchemaKind, StaticTenantConfig,
    TenantRegistry, TenantsConfig,
};
