use crate::migrate::MigrationSummary;
use crate::schema::Schema;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SchemaStatus {
    Succeeded { summary: MigrationSummary },
    Failed { error: String },
    Skipped,
}

/// Result of migrating one schema in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOutcome {
    pub schema_name: String,
    #[serde(flatten)]
    pub status: SchemaStatus,
    pub elapsed_ms: u64,
}

impl SchemaOutcome {
    pub fn succeeded(schema: &Schema, summary: MigrationSummary, elapsed: Duration) -> Self {
        Self {
            schema_name: schema.schema_name().to_string(),
            status: SchemaStatus::Succeeded { summary },
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(schema: &Schema, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            schema_name: schema.schema_name().to_string(),
            status: SchemaStatus::Failed {
                error: error.into(),
            },
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn skipped(schema: &Schema) -> Self {
        Self {
            schema_name: schema.schema_name().to_string(),
            status: SchemaStatus::Skipped,
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, SchemaStatus::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, SchemaStatus::Failed { .. })
    }

    fn status_label(&self) -> &'static str {
        match self.status {
            SchemaStatus::Succeeded { .. } => "ok",
            SchemaStatus::Failed { .. } => "FAILED",
            SchemaStatus::Skipped => "skipped",
        }
    }

    fn detail(&self) -> String {
        match &self.status {
            SchemaStatus::Succeeded { summary } => summary.describe(),
            SchemaStatus::Failed { error } => error.clone(),
            SchemaStatus::Skipped => "not attempted (fail-fast)".to_string(),
        }
    }
}

/// Per-schema outcomes of one batch, in target order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<SchemaOutcome>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    pub fn new(outcomes: Vec<SchemaOutcome>, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        Self {
            outcomes,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// True when no schema failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(SchemaOutcome::is_success)
    }

    pub fn failed(&self) -> Vec<&SchemaOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure()).collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn outcome(&self, schema_name: &str) -> Option<&SchemaOutcome> {
        self.outcomes.iter().find(|o| o.schema_name == schema_name)
    }

    /// Process exit status for this batch.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn render_table(&self) -> String {
        let width = self
            .outcomes
            .iter()
            .map(|o| o.schema_name.len())
            .chain(std::iter::once("SCHEMA".len()))
            .max()
            .unwrap_or(6);

        let mut table = String::new();
        let _ = writeln!(table, "{:<width$}  {:<7}  {:>8}  DETAIL", "SCHEMA", "STATUS", "TIME");
        for outcome in &self.outcomes {
            let _ = writeln!(
                table,
                "{:<width$}  {:<7}  {:>6}ms  {}",
                outcome.schema_name,
                outcome.status_label(),
                outcome.elapsed_ms,
                outcome.detail()
            );
        }
        let _ = write!(
            table,
            "{} schema(s): {} ok, {} failed, {} skipped in {}ms",
            self.outcomes.len(),
            self.succeeded_count(),
            self.failed().len(),
            self.outcomes.len() - self.succeeded_count() - self.failed().len(),
            self.elapsed_ms
        );
        table
    }
}
