use crate::schema::{schema_activate, Schema, SubscriptionId};
use std::path::Path;
use tracing::{debug, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,pgschemas_gateway=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Console logging plus, when `log_dir` is set, JSON lines in a daily
/// rolling file. Keep the returned guard alive for the life of the process.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).unwrap_or_else(|e| {
                eprintln!("Warning: Could not create log directory {}: {}", dir.display(), e);
            });

            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "pgschemas-gateway.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(file_layer)
        .init();

    guard
}

/// Logging for command line tools: stderr only, so stdout stays clean for
/// the report.
pub fn init_cli_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Subscribe a handler that logs every schema activation.
pub fn log_activations() -> SubscriptionId {
    schema_activate().connect(|event| {
        debug!(
            schema_name = %event.schema.schema_name(),
            sender = event.sender,
            "schema activated"
        );
        Ok(())
    })
}

/// Span for work done on behalf of one tenant.
pub fn tenant_span(schema: &Schema) -> Span {
    tracing::info_span!(
        "tenant",
        schema_name = %schema.schema_name(),
        domain = schema.domain_url().unwrap_or_default(),
        folder = schema.folder().unwrap_or_default(),
    )
}
