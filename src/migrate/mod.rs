//! Per-schema migrations: options, the runner seam, the orchestrator that
//! activates each schema in turn, and the batch report.

mod options;
mod orchestrator;
mod report;
mod runner;

pub use options::{BatchOptions, Execution, FailurePolicy, MigrateOptions};
pub use orchestrator::Orchestrator;
pub use report::{BatchReport, SchemaOutcome, SchemaStatus};
pub use runner::{find_migration_files, MigrationFile, MigrationRunner, MigrationSummary, PgMigrationRunner};
