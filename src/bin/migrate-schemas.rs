//! migrate-schemas: apply migrations to a selection of tenant schemas.

use clap::{Args, Parser};
use pgschemas_gateway::config::Config;
use pgschemas_gateway::migrate::{BatchOptions, BatchReport, MigrateOptions, Orchestrator, PgMigrationRunner};
use pgschemas_gateway::pool::PoolManager;
use pgschemas_gateway::registry::{RegistryHandle, SchemaSelection, Selector, TenantRegistry};
use pgschemas_gateway::telemetry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

/// Exit status for configuration and selection errors.
const EXIT_USAGE: u8 = 2;

/// Run migrations on tenant schemas, one schema at a time (or in parallel)
#[derive(Parser, Debug)]
#[command(name = "migrate-schemas")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    selector: SelectorArgs,

    /// Schemas to leave out of the selection
    #[arg(short = 'x', long = "exclude", value_name = "NAME", num_args = 1..)]
    exclude: Vec<String>,

    /// Stop after this migration (file name, `.sql` optional)
    #[arg(long = "target", value_name = "MIGRATION")]
    migration_target: Option<String>,

    /// Record pending migrations as applied without running them
    #[arg(long)]
    fake: bool,

    /// Only list pending migrations
    #[arg(long)]
    plan: bool,

    /// Skip the remaining schemas after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Migrate up to N schemas concurrently
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Tenants file (overrides TENANTS_FILE)
    #[arg(long, value_name = "PATH")]
    tenants_file: Option<PathBuf>,

    /// Root of the migration sets (overrides MIGRATIONS_DIR)
    #[arg(long, value_name = "PATH")]
    migrations_dir: Option<PathBuf>,
}

/// Which schemas to migrate; exactly one is required.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct SelectorArgs {
    /// Named schemas, migrated in the given order
    #[arg(short = 's', long = "schema", value_name = "NAME", num_args = 1..)]
    schemas: Vec<String>,

    /// Every known schema
    #[arg(long)]
    all: bool,

    /// Public, static tenants and the clone reference
    #[arg(long = "static")]
    static_only: bool,

    /// Tenants from the tenant table
    #[arg(long)]
    dynamic: bool,

    /// The public schema only
    #[arg(long)]
    shared: bool,
}

impl Cli {
    fn selection(&self) -> SchemaSelection {
        let args = &self.selector;
        let selector = if args.all {
            Selector::All
        } else if args.static_only {
            Selector::Static
        } else if args.dynamic {
            Selector::Dynamic
        } else if args.shared {
            Selector::Shared
        } else {
            Selector::Named(args.schemas.clone())
        };
        SchemaSelection::new(selector).excluding(self.exclude.iter().cloned())
    }

    fn options(&self) -> MigrateOptions {
        MigrateOptions {
            target: self.migration_target.clone(),
            fake: self.fake,
            plan: self.plan,
            interactive: false,
        }
    }

    fn batch(&self, config: &Config) -> BatchOptions {
        let batch = BatchOptions::default().parallel(self.parallel.unwrap_or(config.migration_workers));
        if self.fail_fast || config.fail_fast {
            batch.fail_fast()
        } else {
            batch
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<BatchReport> {
    let mut config = Config::from_env()?;
    if let Some(path) = &cli.tenants_file {
        config.tenants_file = path.clone();
    }
    if let Some(path) = &cli.migrations_dir {
        config.migrations_dir = path.clone();
    }

    let pool = Arc::new(PoolManager::new(&config).await?);
    let registry = RegistryHandle::new(TenantRegistry::load(&config.tenants_file)?);
    registry.refresh(&pool).await?;
    let snapshot = registry.snapshot().await;

    let runner = PgMigrationRunner::new(pool, &config.migrations_dir);
    let report = Orchestrator::new(runner)
        .migrate(&snapshot, &cli.selection(), &cli.options(), cli.batch(&config))
        .await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    telemetry::init_cli_tracing();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(report) => {
            println!("{}", report.render_table());
            ExitCode::from(report.exit_code() as u8)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgschemas_gateway::migrate::{Execution, FailurePolicy};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("migrate-schemas").chain(args.iter().copied()))
    }

    #[test]
    fn test_named_schemas_with_exclusions() {
        let cli = parse(&["-s", "www", "blog", "-x", "blog", "--fake"]).unwrap();
        let selection = cli.selection();
        assert_eq!(
            selection.selector,
            Selector::Named(vec!["www".to_string(), "blog".to_string()])
        );
        assert_eq!(selection.excluded, vec!["blog"]);
        assert!(cli.options().fake);
        assert!(!cli.options().interactive);
    }

    #[test]
    fn test_selector_flags() {
        assert_eq!(parse(&["--all"]).unwrap().selection().selector, Selector::All);
        assert_eq!(parse(&["--static"]).unwrap().selection().selector, Selector::Static);
        assert_eq!(parse(&["--dynamic"]).unwrap().selection().selector, Selector::Dynamic);
        assert_eq!(parse(&["--shared"]).unwrap().selection().selector, Selector::Shared);
    }

    #[test]
    fn test_exactly_one_selector() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--all", "--shared"]).is_err());
        assert!(parse(&["--all", "-s", "www"]).is_err());
    }

    #[test]
    fn test_target_and_plan() {
        let cli = parse(&["--shared", "--target", "0002_posts", "--plan"]).unwrap();
        let options = cli.options();
        assert_eq!(options.target.as_deref(), Some("0002_posts"));
        assert!(options.plan);
        assert!(!options.fake);
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_batch_flags_override_config() {
        let config = Config {
            database_url: "postgres://localhost/app".to_string(),
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 9000,
            max_connections: 4,
            tenants_file: PathBuf::from("tenants.json"),
            migrations_dir: PathBuf::from("migrations"),
            log_dir: None,
            registry_refresh: std::time::Duration::from_secs(60),
            migration_workers: 1,
            fail_fast: false,
            admin_token: None,
            allowed_admin_ips: vec![],
            trusted_proxies: vec![],
        };

        let batch = parse(&["--all"]).unwrap().batch(&config);
        assert_eq!(batch, BatchOptions::default());

        let batch = parse(&["--all", "--fail-fast", "--parallel", "4"]).unwrap().batch(&config);
        assert_eq!(batch.policy, FailurePolicy::FailFast);
        assert_eq!(batch.execution, Execution::Parallel { workers: 4 });
    }
}
