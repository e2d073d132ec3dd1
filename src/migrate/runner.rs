use crate::error::{Result, TenancyError};
use crate::migrate::MigrateOptions;
use crate::pool::{table_exists, PoolManager};
use crate::registry::TenantRegistry;
use crate::schema::{get_current_schema, quote_ident, Schema};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIGRATIONS_TABLE: &str = "_pgschemas_migrations";

/// What one runner invocation did to the active schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub applied: Vec<String>,
    pub faked: Vec<String>,
    pub planned: Vec<String>,
}

impl MigrationSummary {
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.applied.is_empty() {
            parts.push(format!("{} applied", self.applied.len()));
        }
        if !self.faked.is_empty() {
            parts.push(format!("{} faked", self.faked.len()));
        }
        if !self.planned.is_empty() {
            parts.push(format!("{} pending", self.planned.len()));
        }
        if parts.is_empty() {
            "up to date".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Applies migrations to whichever schema is active in the current
/// execution unit. `registry` is the snapshot the batch was resolved
/// against and stays the same for every schema in it.
pub trait MigrationRunner: Send + Sync + 'static {
    fn run(
        &self,
        registry: &TenantRegistry,
        options: &MigrateOptions,
    ) -> impl Future<Output = Result<MigrationSummary>> + Send;
}

#[derive(Debug, Clone)]
pub struct MigrationFile {
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
}

/// File-based runner: `<root>/<migration set>/*.sql`, applied in file name
/// order and tracked per schema in `_pgschemas_migrations`.
pub struct PgMigrationRunner {
    pool: Arc<PoolManager>,
    migrations_root: PathBuf,
}

impl PgMigrationRunner {
    pub fn new(pool: Arc<PoolManager>, migrations_root: &Path) -> Self {
        Self {
            pool,
            migrations_root: migrations_root.to_path_buf(),
        }
    }

    pub fn migrations_dir(&self, registry: &TenantRegistry, schema: &Schema) -> Result<PathBuf> {
        let set = registry
            .migration_set(schema)
            .ok_or_else(|| TenancyError::MigrationFailed {
                schema: schema.schema_name().to_string(),
                migration: "resolve migration set".to_string(),
                cause: "schema is not known to the tenant registry".to_string(),
            })?;
        Ok(self.migrations_root.join(set))
    }

    async fn migrate_active(
        &self,
        registry: &TenantRegistry,
        options: &MigrateOptions,
    ) -> Result<MigrationSummary> {
        let schema = get_current_schema();
        let schema_name = schema.schema_name().to_string();
        let failed = |migration: &str, cause: String| TenancyError::MigrationFailed {
            schema: schema_name.clone(),
            migration: migration.to_string(),
            cause,
        };

        let migrations_dir = self.migrations_dir(registry, &schema)?;
        let migration_files = find_migration_files(&migrations_dir)
            .map_err(|e| failed("read migrations directory", e.to_string()))?;
        let migration_files = up_to_target(migration_files, options.target.as_deref())
            .map_err(|cause| failed(options.target.as_deref().unwrap_or_default(), cause))?;
        debug!(
            "Found {} migration files in {:?} for {}",
            migration_files.len(),
            migrations_dir,
            schema_name
        );

        let mut client = self
            .pool
            .client_for(&schema, registry.extra_search_paths())
            .await?;

        let table = format!("{}.{}", quote_ident(&schema_name), MIGRATIONS_TABLE);

        let applied: HashMap<String, String> = if options.plan {
            let exists = table_exists(&client, &schema_name, MIGRATIONS_TABLE)
                .await
                .map_err(|e| failed("check migrations table", e.to_string()))?;
            if exists {
                applied_migrations(&client, &table)
                    .await
                    .map_err(|e| failed("query applied migrations", e.to_string()))?
            } else {
                HashMap::new()
            }
        } else {
            client
                .batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {schema};
                     CREATE TABLE IF NOT EXISTS {table} (
                         id SERIAL PRIMARY KEY,
                         migration_file TEXT NOT NULL UNIQUE,
                         checksum TEXT NOT NULL,
                         applied_at TIMESTAMPTZ DEFAULT NOW()
                     )",
                    schema = quote_ident(&schema_name),
                    table = table
                ))
                .await
                .map_err(|e| failed("migrations table creation", e.to_string()))?;
            applied_migrations(&client, &table)
                .await
                .map_err(|e| failed("query applied migrations", e.to_string()))?
        };
        debug!("Schema {} has {} applied migrations", schema_name, applied.len());

        let mut summary = MigrationSummary::default();

        for migration in migration_files {
            if let Some(stored) = applied.get(&migration.name) {
                if *stored != migration.checksum {
                    if !confirm_drift(&schema_name, &migration, options.interactive).await {
                        return Err(failed(
                            &migration.name,
                            format!(
                                "checksum changed since it was applied (stored={}, current={})",
                                stored, migration.checksum
                            ),
                        ));
                    }
                    if !options.plan {
                        client
                            .execute(
                                &format!("UPDATE {} SET checksum = $1 WHERE migration_file = $2", table),
                                &[&migration.checksum, &migration.name],
                            )
                            .await
                            .map_err(|e| failed(&migration.name, e.to_string()))?;
                    }
                }
                debug!("Skipping already applied migration: {}", migration.name);
                continue;
            }

            if options.plan {
                summary.planned.push(migration.name);
                continue;
            }

            let sql = fs::read_to_string(&migration.path)
                .map_err(|e| failed(&migration.name, format!("Failed to read file: {}", e)))?;

            let tx = client
                .transaction()
                .await
                .map_err(|e| failed(&migration.name, e.to_string()))?;

            if !options.fake {
                info!("Applying migration: {} to {}", migration.name, schema_name);
                tx.batch_execute(&sql)
                    .await
                    .map_err(|e| failed(&migration.name, e.to_string()))?;
            }

            tx.execute(
                &format!("INSERT INTO {} (migration_file, checksum) VALUES ($1, $2)", table),
                &[&migration.name, &migration.checksum],
            )
            .await
            .map_err(|e| failed(&migration.name, format!("Failed to record migration: {}", e)))?;

            tx.commit()
                .await
                .map_err(|e| failed(&migration.name, e.to_string()))?;

            if options.fake {
                info!("Faked migration: {} in {}", migration.name, schema_name);
                summary.faked.push(migration.name);
            } else {
                info!(
                    "Successfully applied migration: {} (checksum: {})",
                    migration.name, migration.checksum
                );
                summary.applied.push(migration.name);
            }
        }

        Ok(summary)
    }
}

impl MigrationRunner for PgMigrationRunner {
    fn run(
        &self,
        registry: &TenantRegistry,
        options: &MigrateOptions,
    ) -> impl Future<Output = Result<MigrationSummary>> + Send {
        self.migrate_active(registry, options)
    }
}

async fn applied_migrations(
    client: &tokio_postgres::Client,
    table: &str,
) -> std::result::Result<HashMap<String, String>, tokio_postgres::Error> {
    let rows = client
        .query(
            &format!("SELECT migration_file, checksum FROM {} ORDER BY id", table),
            &[],
        )
        .await?;
    Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
}

/// Ask on the terminal whether to accept a changed migration file.
/// Non-interactive runs never accept.
async fn confirm_drift(schema_name: &str, migration: &MigrationFile, interactive: bool) -> bool {
    if !interactive {
        warn!(
            "Checksum mismatch for migration {} in {} (non-interactive, refusing)",
            migration.name, schema_name
        );
        return false;
    }

    let question = format!(
        "Migration {} changed after it was applied to {}. Accept the new checksum? [y/N] ",
        migration.name, schema_name
    );
    tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{}", question);
        let _ = stderr.flush();
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer).is_ok()
            && matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    })
    .await
    .unwrap_or(false)
}

/// `*.sql` files in `migrations_dir`, sorted by file name. A missing
/// directory means no migrations.
pub fn find_migration_files(migrations_dir: &Path) -> Result<Vec<MigrationFile>> {
    if !migrations_dir.exists() {
        debug!(
            "Migrations directory {:?} does not exist, returning empty list",
            migrations_dir
        );
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "sql") {
            continue;
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        let content = fs::read_to_string(&path)?;

        migrations.push(MigrationFile {
            name,
            checksum: compute_checksum(&content),
            path,
        });
    }

    // Numeric prefixes (0001_, 0002_, ...) give the apply order.
    migrations.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(migrations)
}

/// Truncate after `target`, which may omit the `.sql` extension.
fn up_to_target(
    mut migrations: Vec<MigrationFile>,
    target: Option<&str>,
) -> std::result::Result<Vec<MigrationFile>, String> {
    let Some(target) = target else {
        return Ok(migrations);
    };

    let position = migrations
        .iter()
        .position(|m| m.name == target || m.name.strip_suffix(".sql") == Some(target))
        .ok_or_else(|| format!("no migration named '{}'", target))?;
    migrations.truncate(position + 1);
    Ok(migrations)
}

fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
