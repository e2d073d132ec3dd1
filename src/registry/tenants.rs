use crate::error::{Result, TenancyError};
use crate::pool::PoolManager;
use crate::registry::DomainRecord;
use crate::schema::{check_schema_name, Schema, PUBLIC_SCHEMA};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DEFAULT_KEY: &str = "default";

/// Contents of the tenants file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantsConfig {
    pub public: PublicConfig,
    /// Present when tenants can also be provisioned at runtime.
    #[serde(default)]
    pub default: Option<DynamicTenantsConfig>,
    #[serde(default)]
    pub tenants: BTreeMap<String, StaticTenantConfig>,
    #[serde(default)]
    pub extra_search_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicConfig {
    #[serde(default = "default_public_migrations")]
    pub migrations: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicTenantsConfig {
    #[serde(default = "default_tenant_table")]
    pub tenant_table: String,
    #[serde(default)]
    pub domain_table: Option<String>,
    #[serde(default)]
    pub clone_reference: Option<String>,
    #[serde(default = "default_tenant_migrations")]
    pub migrations: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTenantConfig {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub fallback_domains: Vec<String>,
    /// Migration set directory; defaults to the tenant's own name.
    #[serde(default)]
    pub migrations: Option<String>,
}

fn default_public_migrations() -> String {
    PUBLIC_SCHEMA.to_string()
}

fn default_tenant_table() -> String {
    "tenants".to_string()
}

fn default_tenant_migrations() -> String {
    "tenant".to_string()
}

impl TenantsConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        let config: TenantsConfig = serde_json::from_str(content).map_err(|e| {
            TenancyError::improperly_configured(format!("Invalid tenants file: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TenancyError::improperly_configured(format!(
                "Failed to read tenants file {:?}: {}",
                path, e
            ))
        })?;
        Self::from_json(&content)
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen_domains: HashMap<&str, &str> = HashMap::new();

        for (name, tenant) in &self.tenants {
            if name == PUBLIC_SCHEMA || name == DEFAULT_KEY {
                return Err(TenancyError::improperly_configured(format!(
                    "'{}' is reserved and cannot be declared under 'tenants'.",
                    name
                )));
            }
            if check_schema_name(name).is_err() {
                return Err(TenancyError::improperly_configured(format!(
                    "'{}' is not a valid schema name.",
                    name
                )));
            }
            for domain in tenant.domains.iter().chain(&tenant.fallback_domains) {
                if let Some(owner) = seen_domains.insert(domain.as_str(), name.as_str()) {
                    if owner != name.as_str() {
                        return Err(TenancyError::improperly_configured(format!(
                            "Domain '{}' is claimed by both '{}' and '{}'.",
                            domain, owner, name
                        )));
                    }
                }
            }
        }

        if let Some(dynamic) = &self.default {
            for table in std::iter::once(&dynamic.tenant_table).chain(&dynamic.domain_table) {
                if check_schema_name(table).is_err() {
                    return Err(TenancyError::improperly_configured(format!(
                        "'{}' is not a valid table name.",
                        table
                    )));
                }
            }
            if let Some(reference) = &dynamic.clone_reference {
                if check_schema_name(reference).is_err() {
                    return Err(TenancyError::improperly_configured(format!(
                        "'{}' is not a valid schema name.",
                        reference
                    )));
                }
                if reference == PUBLIC_SCHEMA || self.tenants.contains_key(reference) {
                    return Err(TenancyError::improperly_configured(
                        "default.clone_reference must be a unique schema name.",
                    ));
                }
            }
        }

        let invalid: Vec<&str> = self
            .extra_search_paths
            .iter()
            .map(String::as_str)
            .filter(|path| {
                *path == PUBLIC_SCHEMA
                    || self.tenants.contains_key(*path)
                    || self.clone_reference_name() == Some(*path)
            })
            .collect();
        if !invalid.is_empty() {
            return Err(TenancyError::improperly_configured(format!(
                "Do not include '{}' on extra_search_paths.",
                invalid.join(", ")
            )));
        }

        Ok(())
    }

    fn clone_reference_name(&self) -> Option<&str> {
        self.default
            .as_ref()
            .and_then(|d| d.clone_reference.as_deref())
    }
}

/// Where a known schema comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Shared,
    Static,
    CloneReference,
    Dynamic,
}

/// Read-only view of every known schema.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    config: TenantsConfig,
    statics: Vec<Schema>,
    clone_reference: Option<Schema>,
    dynamic: Vec<Schema>,
    domains: Vec<DomainRecord>,
}

impl TenantRegistry {
    pub fn from_config(config: TenantsConfig) -> Result<Self> {
        config.validate()?;

        let statics = config
            .tenants
            .iter()
            .map(|(name, tenant)| {
                Schema::create(name, tenant.domains.first().map(String::as_str), None)
            })
            .collect::<Result<Vec<_>>>()?;

        let clone_reference = config
            .clone_reference_name()
            .map(|name| Schema::create(name, None, None))
            .transpose()?;

        Ok(Self {
            config,
            statics,
            clone_reference,
            dynamic: Vec::new(),
            domains: Vec::new(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_config(TenantsConfig::load(path)?)
    }

    /// Replace the dynamic tenants and their domains with a fresh snapshot.
    pub fn with_dynamic(
        mut self,
        tenants: Vec<Schema>,
        domains: Vec<DomainRecord>,
    ) -> Result<Self> {
        let static_names: BTreeSet<&str> = std::iter::once(PUBLIC_SCHEMA)
            .chain(self.statics.iter().map(Schema::schema_name))
            .chain(self.clone_reference.iter().map(Schema::schema_name))
            .collect();

        let clash: Vec<&str> = tenants
            .iter()
            .map(Schema::schema_name)
            .filter(|name| static_names.contains(name))
            .collect();
        if !clash.is_empty() {
            return Err(TenancyError::improperly_configured(format!(
                "Name clash found between static and dynamic tenants: {}",
                clash.join(", ")
            )));
        }

        let in_search_path: Vec<&str> = tenants
            .iter()
            .map(Schema::schema_name)
            .filter(|name| self.config.extra_search_paths.iter().any(|p| p == name))
            .collect();
        if !in_search_path.is_empty() {
            return Err(TenancyError::improperly_configured(format!(
                "Do not include '{}' on extra_search_paths.",
                in_search_path.join(", ")
            )));
        }

        for tenant in &tenants {
            check_schema_name(tenant.schema_name())?;
        }

        let mut dynamic = tenants;
        dynamic.sort_by(|a, b| a.schema_name().cmp(b.schema_name()));
        dynamic.dedup();

        let (domains, orphans): (Vec<_>, Vec<_>) = domains
            .into_iter()
            .partition(|d| dynamic.iter().any(|t| t.schema_name() == d.tenant));
        for orphan in orphans {
            warn!("Ignoring domain {} for unknown tenant '{}'", orphan, orphan.tenant);
        }

        self.dynamic = dynamic;
        self.domains = domains;
        Ok(self)
    }

    pub fn config(&self) -> &TenantsConfig {
        &self.config
    }

    pub fn public(&self) -> Schema {
        Schema::public()
    }

    pub fn static_schemas(&self) -> &[Schema] {
        &self.statics
    }

    pub fn clone_reference(&self) -> Option<&Schema> {
        self.clone_reference.as_ref()
    }

    pub fn dynamic_schemas(&self) -> &[Schema] {
        &self.dynamic
    }

    pub fn domains(&self) -> &[DomainRecord] {
        &self.domains
    }

    pub fn extra_search_paths(&self) -> &[String] {
        &self.config.extra_search_paths
    }

    pub fn dynamic_config(&self) -> Option<&DynamicTenantsConfig> {
        self.config.default.as_ref()
    }

    pub fn static_config(&self, name: &str) -> Option<&StaticTenantConfig> {
        self.config.tenants.get(name)
    }

    /// Every known schema: public, static (sorted), clone reference, dynamic (sorted).
    pub fn all(&self) -> Vec<Schema> {
        std::iter::once(self.public())
            .chain(self.statics.iter().cloned())
            .chain(self.clone_reference.iter().cloned())
            .chain(self.dynamic.iter().cloned())
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Schema> {
        self.kind_of(name)?;
        if name == PUBLIC_SCHEMA {
            return Some(self.public());
        }
        self.statics
            .iter()
            .chain(self.clone_reference.iter())
            .chain(self.dynamic.iter())
            .find(|s| s.schema_name() == name)
            .cloned()
    }

    pub fn kind_of(&self, name: &str) -> Option<SchemaKind> {
        if name == PUBLIC_SCHEMA {
            Some(SchemaKind::Shared)
        } else if self.statics.iter().any(|s| s.schema_name() == name) {
            Some(SchemaKind::Static)
        } else if self.clone_reference.as_ref().map(Schema::schema_name) == Some(name) {
            Some(SchemaKind::CloneReference)
        } else if self.dynamic.iter().any(|s| s.schema_name() == name) {
            Some(SchemaKind::Dynamic)
        } else {
            None
        }
    }

    /// Migration set directory name for `schema`.
    ///
    /// Unknown schemas flagged dynamic use the dynamic set, so freshly
    /// provisioned tenants migrate before the registry is refreshed.
    pub fn migration_set(&self, schema: &Schema) -> Option<String> {
        let dynamic_set = || self.dynamic_config().map(|d| d.migrations.clone());

        match self.kind_of(schema.schema_name()) {
            Some(SchemaKind::Shared) => Some(self.config.public.migrations.clone()),
            Some(SchemaKind::Static) => Some(
                self.static_config(schema.schema_name())
                    .and_then(|t| t.migrations.clone())
                    .unwrap_or_else(|| schema.schema_name().to_string()),
            ),
            Some(SchemaKind::CloneReference) | Some(SchemaKind::Dynamic) => dynamic_set(),
            None if schema.is_dynamic() => dynamic_set(),
            None => None,
        }
    }
}

/// Shared, swappable registry snapshot.
///
/// Readers take an `Arc` and keep it for the whole operation, so a refresh
/// never changes the tenant set under a running batch.
#[derive(Clone)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<TenantRegistry>>>,
}

impl RegistryHandle {
    pub fn new(registry: TenantRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    pub async fn snapshot(&self) -> Arc<TenantRegistry> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn replace(&self, registry: TenantRegistry) {
        let dynamic = registry.dynamic_schemas().len();
        *self.current.write().await = Arc::new(registry);
        info!("Tenant registry refreshed ({} dynamic tenants)", dynamic);
    }

    /// Reload dynamic tenants and domains from the database.
    pub async fn refresh(&self, pool: &PoolManager) -> Result<()> {
        let current = self.snapshot().await;
        let registry = TenantRegistry::from_config(current.config().clone())?;

        let registry = match registry.dynamic_config() {
            Some(tables) => {
                let (tenants, domains) = pool.load_dynamic_tenants(tables).await?;
                registry.with_dynamic(tenants, domains)?
            }
            None => registry,
        };

        self.replace(registry).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TENANTS_JSON: &str = r#"{
        "public": {},
        "default": { "tenant_table": "tenants", "domain_table": "domains",
                     "clone_reference": "sample" },
        "tenants": {
            "www":  { "domains": ["localhost"], "fallback_domains": ["tenants.localhost"] },
            "blog": { "domains": ["blog.localhost"], "migrations": "blogging" }
        },
        "extra_search_paths": ["extensions"]
    }"#;

    fn registry() -> TenantRegistry {
        TenantRegistry::from_config(TenantsConfig::from_json(TENANTS_JSON).unwrap()).unwrap()
    }

    fn dynamic(name: &str) -> Schema {
        Schema::dynamic(name, None, None).unwrap()
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tenants.json");
        fs::write(&path, TENANTS_JSON).unwrap();

        let registry = TenantRegistry::load(&path).unwrap();
        assert_eq!(registry.static_schemas().len(), 2);
        assert_eq!(registry.clone_reference().unwrap().schema_name(), "sample");

        assert!(TenantRegistry::load(&temp_dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_public_is_required() {
        let err = TenantsConfig::from_json(r#"{ "tenants": {} }"#).unwrap_err();
        assert!(matches!(err, TenancyError::ImproperlyConfigured { .. }));
    }

    #[test]
    fn test_public_rejects_domains() {
        let err =
            TenantsConfig::from_json(r#"{ "public": { "domains": ["localhost"] } }"#).unwrap_err();
        assert!(matches!(err, TenancyError::ImproperlyConfigured { .. }));
    }

    #[test]
    fn test_default_rejects_domains() {
        let err = TenantsConfig::from_json(
            r#"{ "public": {}, "default": { "domains": ["localhost"] } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, TenancyError::ImproperlyConfigured { .. }));
    }

    #[test]
    fn test_invalid_static_names() {
        for name in ["public", "default", "pg_www", "bad-name"] {
            let json = format!(r#"{{ "public": {{}}, "tenants": {{ "{}": {{}} }} }}"#, name);
            assert!(TenantsConfig::from_json(&json).is_err(), "{} accepted", name);
        }
    }

    #[test]
    fn test_clone_reference_must_be_unique() {
        let json = r#"{ "public": {}, "default": { "clone_reference": "www" },
                        "tenants": { "www": {} } }"#;
        assert!(TenantsConfig::from_json(json).is_err());
    }

    #[test]
    fn test_extra_search_paths_cannot_name_tenants() {
        let json = r#"{ "public": {}, "tenants": { "www": {} }, "extra_search_paths": ["www"] }"#;
        assert!(TenantsConfig::from_json(json).is_err());

        let err = registry()
            .with_dynamic(vec![dynamic("extensions")], vec![])
            .unwrap_err();
        assert!(matches!(err, TenancyError::ImproperlyConfigured { .. }));
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let json = r#"{ "public": {}, "tenants": {
            "www":  { "domains": ["localhost"] },
            "blog": { "fallback_domains": ["localhost"] } } }"#;
        assert!(TenantsConfig::from_json(json).is_err());
    }

    #[test]
    fn test_enumeration_order() {
        let registry = registry()
            .with_dynamic(vec![dynamic("tenant2"), dynamic("tenant1")], vec![])
            .unwrap();
        let names: Vec<String> = registry
            .all()
            .iter()
            .map(|s| s.schema_name().to_string())
            .collect();
        assert_eq!(names, vec!["public", "blog", "www", "sample", "tenant1", "tenant2"]);
    }

    #[test]
    fn test_static_dynamic_clash() {
        let err = registry()
            .with_dynamic(vec![dynamic("www")], vec![])
            .unwrap_err();
        match err {
            TenancyError::ImproperlyConfigured { message } => assert!(message.contains("www")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_lookup_and_kind() {
        let registry = registry().with_dynamic(vec![dynamic("tenant1")], vec![]).unwrap();

        assert_eq!(registry.kind_of("public"), Some(SchemaKind::Shared));
        assert_eq!(registry.kind_of("www"), Some(SchemaKind::Static));
        assert_eq!(registry.kind_of("sample"), Some(SchemaKind::CloneReference));
        assert_eq!(registry.kind_of("tenant1"), Some(SchemaKind::Dynamic));
        assert_eq!(registry.kind_of("ghost"), None);

        let www = registry.lookup("www").unwrap();
        assert_eq!(www.domain_url(), Some("localhost"));
        assert!(registry.lookup("tenant1").unwrap().is_dynamic());
        assert!(registry.lookup("ghost").is_none());
    }

    #[test]
    fn test_migration_sets() {
        let registry = registry().with_dynamic(vec![dynamic("tenant1")], vec![]).unwrap();
        let set = |name: &str| registry.migration_set(&registry.lookup(name).unwrap());

        assert_eq!(set("public").as_deref(), Some("public"));
        assert_eq!(set("www").as_deref(), Some("www"));
        assert_eq!(set("blog").as_deref(), Some("blogging"));
        assert_eq!(set("sample").as_deref(), Some("tenant"));
        assert_eq!(set("tenant1").as_deref(), Some("tenant"));

        assert_eq!(
            registry.migration_set(&dynamic("fresh")).as_deref(),
            Some("tenant")
        );
        assert_eq!(
            registry.migration_set(&Schema::create("ghost", None, None).unwrap()),
            None
        );
    }

    #[test]
    fn test_orphan_domains_dropped() {
        let registry = registry()
            .with_dynamic(
                vec![dynamic("tenant1")],
                vec![
                    DomainRecord::new("tenant1", "tenant1.localhost", ""),
                    DomainRecord::new("gone", "gone.localhost", ""),
                ],
            )
            .unwrap();
        assert_eq!(registry.domains().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_snapshot_is_stable() {
        let handle = RegistryHandle::new(registry());
        let before = handle.snapshot().await;

        handle
            .replace(registry().with_dynamic(vec![dynamic("tenant1")], vec![]).unwrap())
            .await;

        assert!(before.dynamic_schemas().is_empty());
        assert_eq!(handle.snapshot().await.dynamic_schemas().len(), 1);
    }
}
