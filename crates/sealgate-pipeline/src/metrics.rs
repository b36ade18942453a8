//! Pipeline counters

use prometheus_client::metrics::{counter::Counter, family::Family};
use prometheus_client::registry::Registry;

type Labels = Vec<(String, String)>;

#[derive(Clone, Default)]
pub struct PipelineMetrics {
    operations: Family<Labels, Counter>,
    failures: Family<Labels, Counter>,
    commits: Family<Labels, Counter>,
    rekey_skipped: Counter,
}

impl PipelineMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "sealgate_operations",
            "Pipeline operations completed successfully",
            metrics.operations.clone(),
        );
        registry.register(
            "sealgate_operation_failures",
            "Pipeline operations that returned an error",
            metrics.failures.clone(),
        );
        registry.register(
            "sealgate_commits",
            "Persistence commits by outcome",
            metrics.commits.clone(),
        );
        registry.register(
            "sealgate_rekey_skipped_keys",
            "Keys skipped during re-key because export or wrapping failed",
            metrics.rekey_skipped.clone(),
        );
        metrics
    }

    pub fn record_ok(&self, operation: &str) {
        self.operations
            .get_or_create(&vec![("operation".to_string(), operation.to_string())])
            .inc();
    }

    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.failures
            .get_or_create(&vec![
                ("operation".to_string(), operation.to_string()),
                ("kind".to_string(), kind.to_string()),
            ])
            .inc();
    }

    pub fn record_commit(&self, committed: bool) {
        let outcome = if committed { "committed" } else { "failed" };
        self.commits
            .get_or_create(&vec![("outcome".to_string(), outcome.to_string())])
            .inc();
    }

    pub fn record_rekey_skipped(&self) {
        self.rekey_skipped.inc();
    }

    pub fn operations(&self, operation: &str) -> u64 {
        self.operations
            .get_or_create(&vec![("operation".to_string(), operation.to_string())])
            .get()
    }

    pub fn commits(&self, committed: bool) -> u64 {
        let outcome = if committed { "committed" } else { "failed" };
        self.commits
            .get_or_create(&vec![("outcome".to_string(), outcome.to_string())])
            .get()
    }
}
