use crate::api::AppState;
use crate::error::Result;
use crate::migrate::{BatchOptions, BatchReport, MigrateOptions};
use crate::registry::{DynamicTenantsConfig, SchemaKind, SchemaSelection, TenantRegistry};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct TenantInfo {
    pub schema_name: String,
    pub kind: SchemaKind,
    pub domain_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListTenantsResponse {
    pub tenants: Vec<TenantInfo>,
    pub count: usize,
}

fn tenant_listing(registry: &TenantRegistry) -> ListTenantsResponse {
    let tenants: Vec<TenantInfo> = registry
        .all()
        .into_iter()
        .filter_map(|schema| {
            let kind = registry.kind_of(schema.schema_name())?;
            let domain_url = schema.domain_url().map(str::to_string).or_else(|| {
                registry
                    .domains()
                    .iter()
                    .find(|d| d.tenant == schema.schema_name() && d.is_primary)
                    .map(ToString::to_string)
            });
            Some(TenantInfo {
                schema_name: schema.schema_name().to_string(),
                kind,
                domain_url,
            })
        })
        .collect();

    ListTenantsResponse {
        count: tenants.len(),
        tenants,
    }
}

/// 200 when every schema migrated, 207 when the report is mixed.
fn report_status(report: &BatchReport, ok: StatusCode) -> StatusCode {
    if report.is_success() {
        ok
    } else {
        StatusCode::MULTI_STATUS
    }
}

/// The tenant table a provisioned schema goes into; none unless every
/// migration succeeded.
fn registration_table<'a>(
    registry: &'a TenantRegistry,
    report: &BatchReport,
) -> Option<&'a DynamicTenantsConfig> {
    if report.is_success() {
        registry.dynamic_config()
    } else {
        None
    }
}

pub async fn list_tenants(State(state): State<Arc<AppState>>) -> Json<ListTenantsResponse> {
    let registry = state.registry.snapshot().await;
    Json(tenant_listing(&registry))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub schema_name: String,
    #[serde(default)]
    pub options: MigrateOptions,
}

pub async fn provision_tenant(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProvisionRequest>,
) -> Result<impl IntoResponse> {
    let registry = state.registry.snapshot().await;

    let report = state
        .orchestrator
        .provision(&state.pool, &registry, &request.schema_name, &request.options)
        .await?;

    match registration_table(&registry, &report) {
        Some(tables) => {
            state.pool.register_tenant(tables, &request.schema_name).await?;
            if let Err(e) = state.registry.refresh(&state.pool).await {
                warn!("Registry refresh after provisioning {} failed: {}", request.schema_name, e);
            }
            info!("Provisioned tenant schema: {}", request.schema_name);
        }
        None => warn!("Tenant {} was not registered: migrations failed", request.schema_name),
    }

    Ok((report_status(&report, StatusCode::CREATED), Json(report)))
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    #[serde(flatten)]
    pub selection: SchemaSelection,
    #[serde(default)]
    pub options: MigrateOptions,
    /// Falls back to the server's configured batch options.
    #[serde(default)]
    pub batch: Option<BatchOptions>,
}

pub async fn migrate_schemas(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MigrateRequest>,
) -> Result<impl IntoResponse> {
    // One snapshot for the whole batch.
    let registry = state.registry.snapshot().await;

    let report = state
        .orchestrator
        .migrate(
            &registry,
            &request.selection,
            &request.options,
            request.batch.unwrap_or(state.batch),
        )
        .await?;

    Ok((report_status(&report, StatusCode::OK), Json(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::SchemaOutcome;
    use crate::registry::{DomainRecord, Selector, TenantsConfig};
    use crate::schema::Schema;
    use chrono::Utc;
    use std::time::Duration;

    fn registry() -> TenantRegistry {
        let config = TenantsConfig::from_json(
            r#"{ "public": {}, "default": {}, "tenants": { "www": { "domains": ["localhost"] } } }"#,
        )
        .unwrap();
        TenantRegistry::from_config(config)
            .unwrap()
            .with_dynamic(
                vec![Schema::dynamic("tenant1", None, None).unwrap()],
                vec![DomainRecord::new("tenant1", "tenant1.localhost", "")],
            )
            .unwrap()
    }

    #[test]
    fn test_tenant_listing() {
        let listing = tenant_listing(&registry());
        assert_eq!(listing.count, 3);

        let names: Vec<&str> = listing.tenants.iter().map(|t| t.schema_name.as_str()).collect();
        assert_eq!(names, vec!["public", "www", "tenant1"]);
        assert_eq!(listing.tenants[1].kind, SchemaKind::Static);
        assert_eq!(listing.tenants[1].domain_url.as_deref(), Some("localhost"));
        assert_eq!(listing.tenants[2].domain_url.as_deref(), Some("tenant1.localhost"));
    }

    #[test]
    fn test_report_status() {
        let schema = Schema::create("tenant1", None, None).unwrap();
        let ok = BatchReport::new(
            vec![SchemaOutcome::succeeded(&schema, Default::default(), Duration::ZERO)],
            Utc::now(),
            Duration::ZERO,
        );
        assert_eq!(report_status(&ok, StatusCode::OK), StatusCode::OK);

        let mixed = BatchReport::new(
            vec![SchemaOutcome::failed(&schema, "boom", Duration::ZERO)],
            Utc::now(),
            Duration::ZERO,
        );
        assert_eq!(report_status(&mixed, StatusCode::CREATED), StatusCode::MULTI_STATUS);
    }

    #[test]
    fn test_only_migrated_tenants_are_registered() {
        let registry = registry();
        let schema = Schema::dynamic("tenant2", None, None).unwrap();

        let migrated = BatchReport::new(
            vec![SchemaOutcome::succeeded(&schema, Default::default(), Duration::ZERO)],
            Utc::now(),
            Duration::ZERO,
        );
        assert!(registration_table(&registry, &migrated).is_some());

        let failed = BatchReport::new(
            vec![SchemaOutcome::failed(&schema, "syntax error", Duration::ZERO)],
            Utc::now(),
            Duration::ZERO,
        );
        assert!(registration_table(&registry, &failed).is_none());
    }

    #[test]
    fn test_migrate_request_body() {
        let request: MigrateRequest = serde_json::from_str(
            r#"{
                "selector": { "kind": "named", "schemas": ["www", "tenant1"] },
                "excluded": ["tenant1"],
                "options": { "fake": true },
                "batch": { "policy": "fail_fast" }
            }"#,
        )
        .unwrap();

        assert_eq!(
            request.selection.selector,
            Selector::Named(vec!["www".to_string(), "tenant1".to_string()])
        );
        assert_eq!(request.selection.excluded, vec!["tenant1"]);
        assert!(request.options.fake);
        assert_eq!(request.batch, Some(BatchOptions::default().fail_fast()));

        let minimal: MigrateRequest =
            serde_json::from_str(r#"{ "selector": { "kind": "all" } }"#).unwrap();
        assert_eq!(minimal.selection.selector, Selector::All);
        assert!(minimal.batch.is_none());
    }
}
