use crate::error::{Result, TenancyError};
use crate::migrate::{
    BatchOptions, BatchReport, Execution, FailurePolicy, MigrateOptions, MigrationRunner,
    SchemaOutcome,
};
use crate::pool::PoolManager;
use crate::registry::{MigrationTargetSet, SchemaSelection, TenantRegistry};
use crate::schema::{check_schema_name, context, Schema};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};

type InFlightMap = Arc<DashMap<String, DateTime<Utc>>>;

/// Drives a runner over a set of schemas, one scoped activation per schema.
pub struct Orchestrator<R> {
    runner: Arc<R>,
    in_flight: InFlightMap,
}

impl<R> Clone for Orchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<R: MigrationRunner> Orchestrator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Resolve `selection` and migrate every target.
    ///
    /// Only resolution errors are returned as `Err`; per-schema failures are
    /// in the report.
    pub async fn migrate(
        &self,
        registry: &Arc<TenantRegistry>,
        selection: &SchemaSelection,
        options: &MigrateOptions,
        batch: BatchOptions,
    ) -> Result<BatchReport> {
        let targets = selection.resolve(registry)?;
        Ok(self.run_targets(registry, targets, options, batch).await)
    }

    /// Create `schema_name` as a new dynamic tenant and migrate it.
    ///
    /// The schema is dropped again when its migrations fail.
    pub async fn provision(
        &self,
        pool: &PoolManager,
        registry: &Arc<TenantRegistry>,
        schema_name: &str,
        options: &MigrateOptions,
    ) -> Result<BatchReport> {
        check_provisionable(registry, schema_name)?;

        if pool.schema_exists(schema_name).await? {
            return Err(TenancyError::SchemaAlreadyExists {
                schema: schema_name.to_string(),
            });
        }

        pool.create_schema(schema_name).await?;
        let schema = Schema::dynamic(schema_name, None, None)?;

        let report = self
            .run_targets(
                registry,
                MigrationTargetSet::single(schema),
                options,
                BatchOptions::default(),
            )
            .await;

        if !report.is_success() {
            warn!("Provisioning {} failed, dropping the new schema", schema_name);
            if let Err(e) = pool.drop_schema(schema_name).await {
                error!("Failed to drop schema {} after provisioning failure: {}", schema_name, e);
            }
        }

        Ok(report)
    }

    /// Migrate `targets` against the `registry` snapshot they were resolved from.
    pub async fn run_targets(
        &self,
        registry: &Arc<TenantRegistry>,
        targets: MigrationTargetSet,
        options: &MigrateOptions,
        batch: BatchOptions,
    ) -> BatchReport {
        // Batches never prompt.
        let options = options.clone().non_interactive();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Migrating {} schema(s): {} ({:?}, {:?})",
            targets.len(),
            targets.names().join(", "),
            batch.policy,
            batch.execution
        );

        let outcomes = match batch.execution {
            Execution::Parallel { workers } if workers > 1 && targets.len() > 1 => {
                // More workers than targets would only idle.
                let workers = workers.min(targets.len());
                self.run_parallel(registry, targets, options, batch.policy, workers)
                    .await
            }
            _ => {
                self.run_sequential(registry, targets, &options, batch.policy)
                    .await
            }
        };

        let report = BatchReport::new(outcomes, started_at, start.elapsed());
        info!(
            "Migration batch finished: {} ok, {} failed in {}ms",
            report.succeeded_count(),
            report.failed().len(),
            report.elapsed_ms
        );
        report
    }

    async fn run_sequential(
        &self,
        registry: &TenantRegistry,
        targets: MigrationTargetSet,
        options: &MigrateOptions,
        policy: FailurePolicy,
    ) -> Vec<SchemaOutcome> {
        // Own execution unit, seeded with the caller's schema: the batch never
        // touches the caller's slot and is safe across thread hops.
        context::scope(context::active_schema(), async {
            let mut outcomes = Vec::with_capacity(targets.len());
            let mut aborted = false;

            for schema in targets {
                if aborted {
                    outcomes.push(SchemaOutcome::skipped(&schema));
                    continue;
                }

                let outcome =
                    migrate_one(&*self.runner, &self.in_flight, registry, schema, options).await;
                if outcome.is_failure() && policy == FailurePolicy::FailFast {
                    warn!("Fail-fast: skipping remaining schemas after {}", outcome.schema_name);
                    aborted = true;
                }
                outcomes.push(outcome);
            }

            outcomes
        })
        .await
    }

    async fn run_parallel(
        &self,
        registry: &Arc<TenantRegistry>,
        targets: MigrationTargetSet,
        options: MigrateOptions,
        policy: FailurePolicy,
        workers: usize,
    ) -> Vec<SchemaOutcome> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let aborted = Arc::new(AtomicBool::new(false));
        let options = Arc::new(options);

        let handles: Vec<_> = targets
            .into_iter()
            .map(|schema| {
                let runner = Arc::clone(&self.runner);
                let registry = Arc::clone(registry);
                let in_flight = Arc::clone(&self.in_flight);
                let semaphore = Arc::clone(&semaphore);
                let aborted = Arc::clone(&aborted);
                let options = Arc::clone(&options);
                let worker_schema = schema.clone();

                let handle = tokio::spawn(context::scope(None, async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return SchemaOutcome::skipped(&worker_schema);
                    };
                    if aborted.load(Ordering::SeqCst) {
                        return SchemaOutcome::skipped(&worker_schema);
                    }

                    let outcome =
                        migrate_one(&*runner, &in_flight, &registry, worker_schema, &options)
                            .await;
                    if outcome.is_failure() && policy == FailurePolicy::FailFast {
                        aborted.store(true, Ordering::SeqCst);
                    }
                    outcome
                }));

                (schema, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (schema, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Migration worker for {} failed: {}", schema, e);
                    SchemaOutcome::failed(&schema, format!("worker failed: {}", e), Duration::ZERO)
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Checks that need no database: a valid name, unknown to the registry, and
/// a `default` section to take the migration set from.
fn check_provisionable(registry: &TenantRegistry, schema_name: &str) -> Result<()> {
    check_schema_name(schema_name)?;

    if registry.dynamic_config().is_none() {
        return Err(TenancyError::improperly_configured(
            "Provisioning needs a `default` section in the tenants file",
        ));
    }
    if registry.kind_of(schema_name).is_some() {
        return Err(TenancyError::SchemaAlreadyExists {
            schema: schema_name.to_string(),
        });
    }
    Ok(())
}

/// Marks a schema as being migrated; released on drop.
struct InFlightClaim {
    map: InFlightMap,
    schema_name: String,
}

impl InFlightClaim {
    fn acquire(map: &InFlightMap, schema_name: &str) -> Option<Self> {
        match map.entry(schema_name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Some(Self {
                    map: Arc::clone(map),
                    schema_name: schema_name.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.map.remove(&self.schema_name);
    }
}

async fn migrate_one<R: MigrationRunner>(
    runner: &R,
    in_flight: &InFlightMap,
    registry: &TenantRegistry,
    schema: Schema,
    options: &MigrateOptions,
) -> SchemaOutcome {
    let span = info_span!("migrate_schema", schema_name = %schema.schema_name());

    async move {
        let start = Instant::now();

        let Some(_claim) = InFlightClaim::acquire(in_flight, schema.schema_name()) else {
            warn!("Migration already in progress for {}", schema);
            return SchemaOutcome::failed(
                &schema,
                "migration already in progress for this schema",
                start.elapsed(),
            );
        };

        let result = match schema.enter() {
            Ok(_guard) => runner.run(registry, options).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => {
                info!("Migrated {}: {}", schema, summary.describe());
                SchemaOutcome::succeeded(&schema, summary, start.elapsed())
            }
            Err(e) => {
                error!("Migration of {} failed: {}", schema, e);
                SchemaOutcome::failed(&schema, e.to_string(), start.elapsed())
            }
        }
    }
    .instrument(span)
    .await
}
