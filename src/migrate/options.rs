use serde::{Deserialize, Serialize};

/// Options handed through to the migration runner untouched, except that
/// batch runs always clear `interactive`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateOptions {
    /// Stop after this migration (file name, with or without `.sql`).
    #[serde(default)]
    pub target: Option<String>,
    /// Record pending migrations as applied without executing them.
    #[serde(default)]
    pub fake: bool,
    /// Only report what would be applied.
    #[serde(default)]
    pub plan: bool,
    /// Allow the runner to ask for confirmation on the terminal.
    #[serde(default)]
    pub interactive: bool,
}

impl MigrateOptions {
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }
}

/// Batch behaviour after one schema fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep migrating the remaining schemas.
    #[default]
    ContinueOnError,
    /// Skip every schema after the first failure.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Execution {
    #[default]
    Sequential,
    /// Up to `workers` schemas at once, each on its own task and connection.
    Parallel { workers: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default)]
    pub policy: FailurePolicy,
    #[serde(default)]
    pub execution: Execution,
}

impl BatchOptions {
    pub fn fail_fast(mut self) -> Self {
        self.policy = FailurePolicy::FailFast;
        self
    }

    pub fn parallel(mut self, workers: usize) -> Self {
        self.execution = if workers > 1 {
            Execution::Parallel { workers }
        } else {
            Execution::Sequential
        };
        self
    }
}
