//! Host/path based tenant routing.
//!
//! Resolution order: static tenant domains, dynamic domain records (with the
//! first path segment as folder, then without), static fallback domains.

mod layer;

pub use layer::{SchemaRoutingLayer, SchemaRoutingService};

use crate::registry::{DomainRecord, TenantRegistry};
use crate::schema::Schema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Serve the request as `schema`. With a folder match, `strip_prefix`
    /// holds the folder to remove from the request path.
    Tenant {
        schema: Schema,
        strip_prefix: Option<String>,
    },
    /// Permanent redirect to the tenant's primary domain.
    Redirect(String),
    NotFound { hostname: String },
}

/// `host` without port and leading `www.`.
pub fn normalize_host(host: &str) -> &str {
    let hostname = host.split(':').next().unwrap_or(host);
    hostname.strip_prefix("www.").unwrap_or(hostname)
}

/// Remove a leading `/<prefix>/` from `path`, keeping the slash.
pub fn strip_tenant_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(prefix))
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(path)
}

pub fn resolve_route(registry: &TenantRegistry, host: &str, path: &str) -> RouteDecision {
    let hostname = normalize_host(host);

    let static_match = |fallback: bool| {
        registry.config().tenants.iter().find_map(|(name, tenant)| {
            let domains = if fallback {
                &tenant.fallback_domains
            } else {
                &tenant.domains
            };
            domains
                .iter()
                .any(|d| d == hostname)
                .then(|| registry.lookup(name))
                .flatten()
        })
    };

    if let Some(schema) = static_match(false) {
        return RouteDecision::Tenant {
            schema: schema.with_routing(Some(hostname), None),
            strip_prefix: None,
        };
    }

    if let Some(decision) = resolve_dynamic(registry, hostname, path) {
        return decision;
    }

    if let Some(schema) = static_match(true) {
        return RouteDecision::Tenant {
            schema: schema.with_routing(Some(hostname), None),
            strip_prefix: None,
        };
    }

    RouteDecision::NotFound {
        hostname: hostname.to_string(),
    }
}

fn resolve_dynamic(registry: &TenantRegistry, hostname: &str, path: &str) -> Option<RouteDecision> {
    let prefix = path.split('/').nth(1).unwrap_or_default();
    let domains = registry.domains();

    let record = domains
        .iter()
        .find(|d| d.domain == hostname && !prefix.is_empty() && d.folder == prefix)
        .or_else(|| domains.iter().find(|d| d.domain == hostname && d.folder.is_empty()))?;

    let schema = registry.lookup(&record.tenant)?;
    let folder_match = !record.folder.is_empty();
    let stripped = if folder_match {
        strip_tenant_prefix(path, &record.folder)
    } else {
        path
    };

    if record.redirect_to_primary {
        match primary_domain(domains, &record.tenant) {
            Some(primary) => return Some(RouteDecision::Redirect(primary.absolute_url(stripped))),
            None => tracing::warn!(
                "Domain {} redirects to primary but '{}' has no primary domain",
                record,
                record.tenant
            ),
        }
    }

    Some(RouteDecision::Tenant {
        schema: schema.with_routing(Some(hostname), folder_match.then_some(record.folder.as_str())),
        strip_prefix: folder_match.then(|| record.folder.clone()),
    })
}

fn primary_domain<'a>(domains: &'a [DomainRecord], tenant: &str) -> Option<&'a DomainRecord> {
    domains.iter().find(|d| d.tenant == tenant && d.is_primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TenantsConfig;

    fn registry() -> TenantRegistry {
        let config = TenantsConfig::from_json(
            r#"{
                "public": {},
                "default": { "domain_table": "domains" },
                "tenants": {
                    "www": { "domains": ["localhost"] },
                    "blog": { "domains": ["blog.localhost"], "fallback_domains": ["tenants.localhost"] }
                }
            }"#,
        )
        .unwrap();

        let mut redirecting = DomainRecord::new("tenant1", "old.localhost", "");
        redirecting.is_primary = false;
        redirecting.redirect_to_primary = true;
        let mut secondary = DomainRecord::new("tenant2", "tenants.localhost", "tenant2");
        secondary.is_primary = false;

        TenantRegistry::from_config(config)
            .unwrap()
            .with_dynamic(
                vec![
                    Schema::dynamic("tenant1", None, None).unwrap(),
                    Schema::dynamic("tenant2", None, None).unwrap(),
                ],
                vec![
                    DomainRecord::new("tenant1", "tenant1.localhost", ""),
                    redirecting,
                    DomainRecord::new("tenant2", "tenant2.localhost", ""),
                    secondary,
                ],
            )
            .unwrap()
    }

    fn tenant(decision: RouteDecision) -> (Schema, Option<String>) {
        match decision {
            RouteDecision::Tenant { schema, strip_prefix } => (schema, strip_prefix),
            other => panic!("expected a tenant, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("www.blog.localhost:8000"), "blog.localhost");
        assert_eq!(normalize_host("localhost"), "localhost");
    }

    #[test]
    fn test_strip_tenant_prefix() {
        assert_eq!(strip_tenant_prefix("/tenant2/some/path", "tenant2"), "/some/path");
        assert_eq!(strip_tenant_prefix("/tenant2/", "tenant2"), "/");
        assert_eq!(strip_tenant_prefix("/tenant22/x", "tenant2"), "/tenant22/x");
        assert_eq!(strip_tenant_prefix("/tenant2", "tenant2"), "/tenant2");
    }

    #[test]
    fn test_static_domain() {
        let (schema, prefix) = tenant(resolve_route(&registry(), "www.blog.localhost:8000", "/"));
        assert_eq!(schema.schema_name(), "blog");
        assert_eq!(schema.domain_url(), Some("blog.localhost"));
        assert_eq!(prefix, None);
    }

    #[test]
    fn test_dynamic_domain() {
        let (schema, prefix) = tenant(resolve_route(&registry(), "tenant1.localhost", "/some/path"));
        assert_eq!(schema.schema_name(), "tenant1");
        assert!(schema.is_dynamic());
        assert_eq!(schema.folder(), None);
        assert_eq!(prefix, None);
    }

    #[test]
    fn test_dynamic_folder_wins_over_fallback() {
        let (schema, prefix) = tenant(resolve_route(&registry(), "tenants.localhost", "/tenant2/x"));
        assert_eq!(schema.schema_name(), "tenant2");
        assert_eq!(schema.folder(), Some("tenant2"));
        assert_eq!(prefix.as_deref(), Some("tenant2"));

        let (schema, _) = tenant(resolve_route(&registry(), "tenants.localhost", "/other/x"));
        assert_eq!(schema.schema_name(), "blog");
    }

    #[test]
    fn test_redirect_to_primary() {
        assert_eq!(
            resolve_route(&registry(), "old.localhost", "/some/path"),
            RouteDecision::Redirect("//tenant1.localhost/some/path".to_string())
        );
    }

    #[test]
    fn test_not_found() {
        assert_eq!(
            resolve_route(&registry(), "nobody.localhost:80", "/"),
            RouteDecision::NotFound {
                hostname: "nobody.localhost".to_string()
            }
        );
    }
}
