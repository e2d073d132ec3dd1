use crate::config::Config;
use crate::error::{Result, TenancyError};
use crate::registry::{DomainRecord, DynamicTenantsConfig};
use crate::schema::{check_schema_name, quote_ident, Schema, PUBLIC_SCHEMA};
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Object, Pool, RecyclingMethod, Runtime,
};
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// One pool for the tenant database; every checkout is pointed at a schema
/// through `search_path` before it is handed out.
pub struct PoolManager {
    pool: Pool,
    database: String,
}

impl PoolManager {
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = create_pool(&config.database_url, config.max_connections)?;
        let database = database_name(&config.database_url);

        let client = pool.get().await.map_err(|e| TenancyError::ConnectionFailed {
            database: database.clone(),
            cause: e.to_string(),
        })?;

        client
            .execute("SELECT 1", &[])
            .await
            .map_err(|e| TenancyError::ConnectionFailed {
                database: database.clone(),
                cause: format!("Ping failed: {}", e),
            })?;

        info!("Connected to PostgreSQL database {}", database);

        Ok(Self { pool, database })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn client(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| TenancyError::ConnectionFailed {
            database: self.database.clone(),
            cause: e.to_string(),
        })
    }

    /// A connection whose `search_path` targets `schema`.
    pub async fn client_for(&self, schema: &Schema, extra_search_paths: &[String]) -> Result<Object> {
        let client = self.client().await?;
        let statement = format!(
            "SET search_path TO {}",
            search_path(schema, extra_search_paths)?.join(", ")
        );
        client.batch_execute(&statement).await.map_err(|e| {
            TenancyError::ConnectionFailed {
                database: self.database.clone(),
                cause: format!("Failed to set search_path for {}: {}", schema, e),
            }
        })?;
        Ok(client)
    }

    pub async fn is_connected(&self) -> bool {
        match self.client().await {
            Ok(client) => client.execute("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn schema_exists(&self, schema_name: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM pg_namespace WHERE nspname = $1",
                &[&schema_name],
            )
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_schema(&self, schema_name: &str) -> Result<()> {
        check_schema_name(schema_name)?;

        if self.schema_exists(schema_name).await? {
            debug!("Schema {} already exists", schema_name);
            return Ok(());
        }

        let client = self.client().await?;
        client
            .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema_name)))
            .await
            .map_err(|e| TenancyError::Internal(format!("Failed to create schema: {}", e)))?;

        info!("Created schema: {}", schema_name);
        Ok(())
    }

    pub async fn drop_schema(&self, schema_name: &str) -> Result<()> {
        check_schema_name(schema_name)?;
        if schema_name == PUBLIC_SCHEMA {
            return Err(TenancyError::InvalidRequest {
                message: "The public schema cannot be dropped".to_string(),
            });
        }

        let client = self.client().await?;
        client
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema_name)))
            .await
            .map_err(|e| TenancyError::Internal(format!("Failed to drop schema: {}", e)))?;

        warn!("Dropped schema: {}", schema_name);
        Ok(())
    }

    /// Record `schema_name` in the tenant table so refreshes pick it up.
    pub async fn register_tenant(&self, tables: &DynamicTenantsConfig, schema_name: &str) -> Result<()> {
        check_schema_name(schema_name)?;
        let client = self.client().await?;

        if !table_exists(&client, PUBLIC_SCHEMA, &tables.tenant_table).await? {
            return Err(TenancyError::improperly_configured(format!(
                "Tenant table public.{} does not exist; run the public migrations first",
                tables.tenant_table
            )));
        }

        client
            .execute(
                &format!(
                    "INSERT INTO public.{table} (schema_name) \
                     SELECT $1::text WHERE NOT EXISTS \
                     (SELECT 1 FROM public.{table} WHERE schema_name = $1::text)",
                    table = quote_ident(&tables.tenant_table)
                ),
                &[&schema_name],
            )
            .await?;

        info!("Registered tenant {} in public.{}", schema_name, tables.tenant_table);
        Ok(())
    }

    /// Read dynamic tenants (and their domains) from the public schema.
    ///
    /// A missing tenant table yields no tenants: the tables are created by
    /// the public migrations, which may not have run yet.
    pub async fn load_dynamic_tenants(
        &self,
        tables: &DynamicTenantsConfig,
    ) -> Result<(Vec<Schema>, Vec<DomainRecord>)> {
        let client = self.client().await?;

        if !table_exists(&client, PUBLIC_SCHEMA, &tables.tenant_table).await? {
            warn!(
                "Tenant table public.{} does not exist yet; no dynamic tenants loaded",
                tables.tenant_table
            );
            return Ok((Vec::new(), Vec::new()));
        }

        let rows = client
            .query(
                &format!(
                    "SELECT schema_name FROM public.{} ORDER BY schema_name",
                    quote_ident(&tables.tenant_table)
                ),
                &[],
            )
            .await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get(0);
            match Schema::dynamic(&name, None, None) {
                Ok(schema) => tenants.push(schema),
                Err(e) => warn!("Skipping tenant row: {}", e),
            }
        }

        let domains = match &tables.domain_table {
            Some(domain_table) if table_exists(&client, PUBLIC_SCHEMA, domain_table).await? => {
                let rows = client
                    .query(
                        &format!(
                            "SELECT t.schema_name, d.domain, d.folder, d.is_primary, d.redirect_to_primary \
                             FROM public.{} d JOIN public.{} t ON t.id = d.tenant_id \
                             ORDER BY d.domain, d.folder",
                            quote_ident(domain_table),
                            quote_ident(&tables.tenant_table)
                        ),
                        &[],
                    )
                    .await?;

                rows.iter()
                    .map(|row| DomainRecord {
                        tenant: row.get(0),
                        domain: row.get(1),
                        folder: row.get(2),
                        is_primary: row.get(3),
                        redirect_to_primary: row.get(4),
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        debug!(
            "Loaded {} dynamic tenants and {} domains",
            tenants.len(),
            domains.len()
        );

        Ok((tenants, domains))
    }
}

/// Matches by schema and table name, so no regclass cast is involved.
const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_tables \
                                WHERE schemaname = $1 AND tablename = $2)";

/// Whether `schema_name.table` exists.
pub async fn table_exists(client: &Object, schema_name: &str, table: &str) -> Result<bool> {
    let row = client.query_one(TABLE_EXISTS_SQL, &[&schema_name, &table]).await?;
    Ok(row.get(0))
}

/// Ordered, quoted search path for `schema`: the schema itself, the extra
/// paths, then `public`.
pub fn search_path(schema: &Schema, extra_search_paths: &[String]) -> Result<Vec<String>> {
    let mut path = vec![schema.schema_name().to_string()];
    path.extend(extra_search_paths.iter().cloned());
    if !schema.is_public() {
        path.push(PUBLIC_SCHEMA.to_string());
    }

    path.iter()
        .map(|name| check_schema_name(name).map(|_| quote_ident(name)))
        .collect()
}

fn database_name(database_url: &str) -> String {
    database_url
        .rsplit('/')
        .next()
        .map(|tail| tail.split('?').next().unwrap_or(tail))
        .filter(|name| !name.is_empty())
        .unwrap_or("postgres")
        .to_string()
}

fn create_pool(database_url: &str, max_size: u32) -> Result<Pool> {
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url.to_string());
    // DISCARD ALL on recycle, so no search_path leaks between checkouts.
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Clean,
    });

    cfg.pool = Some(deadpool_postgres::PoolConfig {
        max_size: max_size as usize,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(5)),
            recycle: Some(Duration::from_secs(5)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| TenancyError::Internal(format!("Failed to create pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_for_tenant() {
        let tenant = Schema::create("tenant1", None, None).unwrap();
        let path = search_path(&tenant, &["extensions".to_string()]).unwrap();
        assert_eq!(path, vec!["\"tenant1\"", "\"extensions\"", "\"public\""]);
    }

    #[test]
    fn test_search_path_for_public() {
        let path = search_path(&Schema::public(), &[]).unwrap();
        assert_eq!(path, vec!["\"public\""]);
    }

    #[test]
    fn test_search_path_rejects_bad_names() {
        let bad = Schema::create("tenant; DROP", None, None).unwrap();
        assert!(search_path(&bad, &[]).is_err());
    }

    #[test]
    fn test_table_lookup_binds_schema_and_name() {
        assert!(TABLE_EXISTS_SQL.contains("pg_catalog.pg_tables"));
        assert!(TABLE_EXISTS_SQL.contains("schemaname = $1"));
        assert!(TABLE_EXISTS_SQL.contains("tablename = $2"));
        assert!(!TABLE_EXISTS_SQL.contains("regclass"));
    }

    #[test]
    fn test_database_name() {
        assert_eq!(database_name("postgres://u:p@localhost:5432/app"), "app");
        assert_eq!(database_name("postgres://u:p@localhost:5432/app?sslmode=disable"), "app");
        assert_eq!(database_name("postgres://u:p@localhost:5432/"), "postgres");
    }
}
